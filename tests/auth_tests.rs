use backbone::auth::{Action, User, UserRegistry, permission_codename, token_auth};
use backbone::orm::{Db, ModelMeta};
use backbone::router::{Method, RequestContext};
use std::sync::Arc;

#[test]
fn test_permission_codenames() {
    let model = ModelMeta::builder("blog", "BlogPost").build().unwrap();
    assert_eq!(permission_codename(&model, Action::Add), "blog.add_blogpost");
    assert_eq!(permission_codename(&model, Action::Change), "blog.change_blogpost");
    assert_eq!(permission_codename(&model, Action::Delete), "blog.delete_blogpost");
}

#[test]
fn test_user_permissions() {
    let editor = User::new(1, "editor").with_perm("blog.add_post");
    assert!(editor.is_authenticated());
    assert!(editor.has_perm("blog.add_post"));
    assert!(!editor.has_perm("blog.delete_post"));

    let admin = User::new(2, "admin").superuser();
    assert!(admin.has_perm("blog.delete_post"));

    let mut disabled = User::new(3, "gone").superuser().with_perm("blog.add_post");
    disabled.is_active = false;
    assert!(!disabled.has_perm("blog.add_post"));

    let anonymous = User::default();
    assert!(!anonymous.is_authenticated());
    assert!(!anonymous.has_perm("blog.add_post"));
}

#[test]
fn test_registry_lookup() {
    let registry = UserRegistry::new();
    assert!(registry.is_empty());
    registry.insert("secret", User::new(1, "editor"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("secret").unwrap().username, "editor");
    assert!(registry.get("other").is_none());
}

#[test]
fn test_token_auth_middleware() {
    let registry = Arc::new(UserRegistry::new());
    registry.insert("secret", User::new(1, "editor"));
    let middleware = token_auth(registry);

    let mut ctx = RequestContext::new(Method::GET, "/blog/post")
        .with_header("Authorization", "Token secret");
    assert!(middleware(&mut ctx).is_none());
    assert_eq!(ctx.user.username, "editor");

    let mut ctx = RequestContext::new(Method::GET, "/blog/post")
        .with_header("Authorization", "Token wrong");
    assert!(middleware(&mut ctx).is_none());
    assert!(!ctx.user.is_authenticated());

    let mut ctx = RequestContext::new(Method::GET, "/blog/post")
        .with_header("Authorization", "Basic c2VjcmV0");
    middleware(&mut ctx);
    assert!(!ctx.user.is_authenticated());
}

#[tokio::test]
async fn test_registry_loads_users_from_database() {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    UserRegistry::migrate(&db).await.unwrap();
    // Running it again is harmless
    UserRegistry::migrate(&db).await.unwrap();
    db.execute(
        "INSERT INTO auth_user (username, token, is_active, is_superuser) VALUES \
         ('editor', 'tok-editor', 1, 0), ('admin', 'tok-admin', 1, 1), ('old', 'tok-old', 0, 0)",
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO auth_user_permissions (user_id, codename) VALUES \
         (1, 'blog.add_post'), (1, 'blog.change_post'), (3, 'blog.add_post')",
    )
    .await
    .unwrap();

    let registry = UserRegistry::new();
    registry.insert("stale", User::new(99, "stale"));
    registry.load(&db).await.unwrap();
    assert_eq!(registry.len(), 3);
    assert!(registry.get("stale").is_none());

    let editor = registry.get("tok-editor").unwrap();
    assert_eq!(editor.id, Some(1));
    assert!(editor.has_perm("blog.change_post"));
    assert!(!editor.has_perm("blog.delete_post"));

    assert!(registry.get("tok-admin").unwrap().has_perm("blog.delete_post"));
    assert!(!registry.get("tok-old").unwrap().has_perm("blog.add_post"));
}
