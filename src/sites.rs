//! Registry of API views and the URLs they are served under.
//!
//! Every registered model gets two routes, named within the `backbone`
//! namespace:
//!
//! - `<prefix>/<app_label>/<module_name>`, named `<app_label>_<module_name>_list`
//! - `<prefix>/<app_label>/<module_name>/:id`, named `<app_label>_<module_name>_detail`

use crate::error::{Error, Result};
use crate::orm::{Db, ModelMeta};
use crate::router::{AppState, Handler, Middleware, RequestContext, Router, UrlConf};
use crate::settings::Settings;
use crate::views::ApiView;
use futures::FutureExt;
use log::info;
use std::sync::Arc;

pub const NAMESPACE: &str = "backbone";

#[derive(Default)]
pub struct BackboneSite {
    prefix: String,
    views: Vec<Arc<ApiView>>,
}

impl BackboneSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every route under `prefix`, e.g. `/api`.
    pub fn with_prefix(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        BackboneSite {
            prefix: if trimmed.is_empty() {
                String::new()
            } else {
                format!("/{trimmed}")
            },
            views: Vec::new(),
        }
    }

    /// A site served under `settings.url_prefix`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_prefix(&settings.url_prefix)
    }

    /// Add a view. Each model can be registered once.
    pub fn register(&mut self, view: ApiView) -> Result<()> {
        if self.is_registered(view.model()) {
            return Err(Error::AlreadyRegistered(view.model().label()));
        }
        view.check()?;
        info!("Registered API view for `{}`", view.model().label());
        self.views.push(Arc::new(view));
        Ok(())
    }

    pub fn unregister(&mut self, model: &ModelMeta) -> Result<()> {
        let label = model.label();
        let before = self.views.len();
        self.views.retain(|view| view.model().label() != label);
        if self.views.len() == before {
            return Err(Error::NotRegistered(label));
        }
        Ok(())
    }

    pub fn is_registered(&self, model: &ModelMeta) -> bool {
        let label = model.label();
        self.views.iter().any(|view| view.model().label() == label)
    }

    pub fn views(&self) -> &[Arc<ApiView>] {
        &self.views
    }

    /// `<namespace>:<app_label>_<module_name>_<kind>`, kind being `list` or `detail`.
    pub fn url_name(model: &ModelMeta, kind: &str) -> String {
        format!(
            "{}:{}_{}_{}",
            NAMESPACE,
            model.app_label(),
            model.module_name(),
            kind
        )
    }

    pub fn collection_pattern(&self, model: &ModelMeta) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            model.app_label(),
            model.module_name()
        )
    }

    pub fn detail_pattern(&self, model: &ModelMeta) -> String {
        format!("{}/:id", self.collection_pattern(model))
    }

    /// Names and patterns of every registered route.
    pub fn url_conf(&self) -> UrlConf {
        let mut urls = UrlConf::default();
        for view in &self.views {
            let model = view.model();
            urls.add(Self::url_name(model, "list"), self.collection_pattern(model));
            urls.add(Self::url_name(model, "detail"), self.detail_pattern(model));
        }
        urls
    }

    /// Register every view's collection and detail routes on `router`.
    pub fn install(&self, router: &mut Router, middlewares: Vec<Middleware>) {
        for view in &self.views {
            let model = view.model();
            router.add_named_route(
                &Self::url_name(model, "list"),
                &self.collection_pattern(model),
                view_handler(view.clone()),
                middlewares.clone(),
            );
            router.add_named_route(
                &Self::url_name(model, "detail"),
                &self.detail_pattern(model),
                view_handler(view.clone()),
                middlewares.clone(),
            );
        }
    }

    /// Create or update the table of every registered model.
    pub async fn migrate(&self, db: &Db) -> Result<()> {
        info!("Migrating {} registered models...", self.views.len());
        for view in &self.views {
            view.model().migrate(db).await?;
        }
        Ok(())
    }
}

fn view_handler(view: Arc<ApiView>) -> Handler {
    Arc::new(move |ctx: RequestContext, state: AppState| {
        let view = view.clone();
        async move { view.dispatch(&ctx, &state).await }.boxed()
    })
}
