//! Minimal async record store for backbone (sqlite + sqlx)
//!
//! Models are described at runtime with a [`ModelMeta`] so that a single,
//! generic view can list, read, create, update and delete their rows.
//!
//! Usage:
//! let db = Db::connect("sqlite::memory:").await?;
//! let post = ModelMeta::builder("blog", "Post").field(FieldDef::char("title", 200)).build()?;
//! post.migrate(&db).await?;
//! let records = db.fetch(&Query::new(post.clone()), 0, None).await?;
use crate::error::{Error, Result};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
pub use sqlx::FromRow;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::sync::Arc;
use walkdir::WalkDir;

const MIGRATIONS_TABLE: &str = "__backbone_migrations";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// An async database pool wrapper.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

/// Storage type of a model field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    /// Stored as text so no precision is lost.
    Decimal,
    Boolean,
    Text,
    /// RFC 3339 text, always UTC.
    DateTime,
    /// `YYYY-MM-DD` text.
    Date,
}

impl FieldKind {
    fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Float => "REAL",
            FieldKind::Decimal | FieldKind::Text | FieldKind::DateTime | FieldKind::Date => {
                "TEXT"
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub null: bool,
    pub blank: bool,
    pub default: Option<Value>,
    pub max_length: Option<usize>,
    pub choices: Vec<Value>,
    pub editable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDef {
            name: name.into(),
            kind,
            null: false,
            blank: false,
            default: None,
            max_length: None,
            choices: Vec::new(),
            editable: true,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean).default(Value::Bool(false))
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn char(name: impl Into<String>, max_length: usize) -> Self {
        Self::new(name, FieldKind::Text).max_length(max_length)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn not_editable(mut self) -> Self {
        self.editable = false;
        self
    }

    fn column_sql(&self) -> String {
        if self.null {
            format!("{} {}", quote_ident(&self.name), self.kind.sql_type())
        } else {
            format!("{} {} NOT NULL", quote_ident(&self.name), self.kind.sql_type())
        }
    }

    /// Value stored when an insert does not mention the field.
    fn missing_value(&self) -> SqlValue {
        if let Some(default) = &self.default {
            return SqlValue::from_json(self.kind, default);
        }
        match (self.null, self.kind) {
            (true, _) => SqlValue::Null,
            (false, FieldKind::Text) => SqlValue::Text(String::new()),
            (false, FieldKind::Boolean) => SqlValue::Integer(0),
            _ => SqlValue::Null,
        }
    }

    fn decode(&self, row: &SqliteRow) -> Result<Value> {
        let name = self.name.as_str();
        let value = match self.kind {
            FieldKind::Integer => row.try_get::<Option<i64>, _>(name)?.map(Value::from),
            FieldKind::Float => row.try_get::<Option<f64>, _>(name)?.map(Value::from),
            FieldKind::Boolean => row
                .try_get::<Option<i64>, _>(name)?
                .map(|flag| Value::Bool(flag != 0)),
            FieldKind::Decimal | FieldKind::Text | FieldKind::DateTime | FieldKind::Date => {
                row.try_get::<Option<String>, _>(name)?.map(Value::String)
            }
        };
        Ok(value.unwrap_or(Value::Null))
    }
}

/// A computed attribute of a record, e.g. a model method or a view method.
pub type RecordFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Runtime description of a model: where it lives and which fields it has.
pub struct ModelMeta {
    app_label: String,
    object_name: String,
    table: String,
    fields: Vec<FieldDef>,
    methods: BTreeMap<String, RecordFn>,
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("app_label", &self.app_label)
            .field("object_name", &self.object_name)
            .field("table", &self.table)
            .field("fields", &self.fields)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ModelBuilder {
    app_label: String,
    object_name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    methods: BTreeMap<String, RecordFn>,
}

impl ModelBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Register a callable attribute, serialized by calling it with the record.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn build(self) -> Result<Arc<ModelMeta>> {
        check_identifier(&self.app_label)?;
        check_identifier(&self.object_name)?;
        let table = self.table.unwrap_or_else(|| {
            format!("{}_{}", self.app_label, self.object_name.to_lowercase())
        });
        check_identifier(&table)?;

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            check_identifier(&field.name)?;
            if field.name == "id" || !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidField(field.name.clone()));
            }
        }

        Ok(Arc::new(ModelMeta {
            app_label: self.app_label,
            object_name: self.object_name,
            table,
            fields: self.fields,
            methods: self.methods,
        }))
    }
}

impl ModelMeta {
    pub fn builder(app_label: impl Into<String>, object_name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            app_label: app_label.into(),
            object_name: object_name.into(),
            table: None,
            fields: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn app_label(&self) -> &str {
        &self.app_label
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Lowercased object name, used in URLs and permission codenames.
    pub fn module_name(&self) -> String {
        self.object_name.to_lowercase()
    }

    /// `app_label.ObjectName`, unique per registered model.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.object_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True for `id` and every declared field.
    pub fn has_db_field(&self, name: &str) -> bool {
        name == "id" || self.get_field(name).is_some()
    }

    pub fn method(&self, name: &str) -> Option<&RecordFn> {
        self.methods.get(name)
    }

    pub fn create_table_sql(&self) -> String {
        let mut columns = vec!["\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        columns.extend(self.fields.iter().map(FieldDef::column_sql));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            columns.join(", ")
        )
    }

    /// Create the table, or add any columns missing from an existing one.
    pub async fn migrate(&self, db: &Db) -> Result<()> {
        let table_name = self.table_name();
        let create_sql = self.create_table_sql();
        let schema_hash = hash(&create_sql);

        ensure_migrations_table(db).await?;

        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT hash FROM {MIGRATIONS_TABLE} WHERE table_name = ?"
        ))
        .bind(table_name)
        .fetch_optional(&db.pool)
        .await?;

        let Some((applied_hash,)) = row else {
            db.execute(&create_sql).await?;
            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (table_name, schema_sql, hash) VALUES (?, ?, ?)"
            ))
            .bind(table_name)
            .bind(&create_sql)
            .bind(&schema_hash)
            .execute(&db.pool)
            .await?;
            info!(
                "Migrated `{}` (table created, initial schema applied).",
                table_name
            );
            return Ok(());
        };

        if applied_hash == schema_hash {
            info!("No schema changes detected for `{}`.", table_name);
            return Ok(());
        }

        // Get existing cols from DB
        let pragma_sql = format!("PRAGMA table_info({})", quote_ident(table_name));
        let cols: Vec<String> = sqlx::query(&pragma_sql)
            .fetch_all(&db.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;

        let mut added = Vec::new();
        for field in &self.fields {
            if cols.contains(&field.name) {
                continue;
            }
            // sqlite refuses NOT NULL columns without a default on ALTER
            let mut statement = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table_name),
                quote_ident(&field.name),
                field.kind.sql_type()
            );
            if let SqlValue::Integer(_) | SqlValue::Real(_) | SqlValue::Text(_) =
                field.missing_value()
            {
                statement.push_str(&format!(" DEFAULT {}", field.missing_value().literal()));
            }
            db.execute(&statement).await?;
            added.push((field.name.clone(), field.kind.sql_type()));
        }

        if added.is_empty() {
            info!("Schema hash changed for `{}` but no columns were added.", table_name);
        } else {
            info!(
                "Schema changes detected for `{}`, the following columns were added:",
                table_name
            );
            for (name, sqltype) in &added {
                info!("  - {} {}", name, sqltype);
            }
        }
        sqlx::query(&format!(
            "UPDATE {MIGRATIONS_TABLE} \
             SET schema_sql = ?, hash = ?, applied_at = CURRENT_TIMESTAMP \
             WHERE table_name = ?"
        ))
        .bind(&create_sql)
        .bind(&schema_hash)
        .bind(table_name)
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

/// One row of a model's table.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: i64,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Field value by name; `id` resolves to the primary key.
    pub fn get(&self, name: &str) -> Option<Value> {
        if name == "id" {
            Some(Value::from(self.id))
        } else {
            self.values.get(name).cloned()
        }
    }

    fn from_row(meta: &ModelMeta, row: &SqliteRow) -> Result<Self> {
        let id: i64 = row.try_get("id")?;
        let mut values = BTreeMap::new();
        for field in meta.fields() {
            values.insert(field.name.clone(), field.decode(row)?);
        }
        Ok(Record { id, values })
    }
}

/// A value ready to be bound to a statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Convert an already cleaned JSON value for storage in a `kind` column.
    pub fn from_json(kind: FieldKind, value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match (kind, n.as_i64()) {
                (FieldKind::Float, _) => SqlValue::Real(n.as_f64().unwrap_or_default()),
                (FieldKind::Decimal | FieldKind::Text, _) => SqlValue::Text(n.to_string()),
                (_, Some(i)) => SqlValue::Integer(i),
                (_, None) => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    fn literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => format!("'{}'", escape_sql_quote(s)),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
    }
}

/// The set of records a view works on: a model, equality filters and an ordering.
#[derive(Clone, Debug)]
pub struct Query {
    model: Arc<ModelMeta>,
    filters: Vec<(String, SqlValue)>,
    ordering: Vec<String>,
}

impl Query {
    pub fn new(model: Arc<ModelMeta>) -> Self {
        Query {
            model,
            filters: Vec::new(),
            ordering: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<ModelMeta> {
        &self.model
    }

    pub fn ordering(&self) -> &[String] {
        &self.ordering
    }

    /// Keep only records whose `field` equals `value`.
    pub fn filter(mut self, field: &str, value: impl Into<SqlValue>) -> Result<Self> {
        if !self.model.has_db_field(field) {
            return Err(Error::InvalidField(field.to_string()));
        }
        self.filters.push((field.to_string(), value.into()));
        Ok(self)
    }

    /// Replace the ordering. A leading `-` sorts descending.
    pub fn order_by<S: AsRef<str>>(mut self, fields: &[S]) -> Result<Self> {
        let mut ordering = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            let name = field.strip_prefix('-').unwrap_or(field);
            if !self.model.has_db_field(name) {
                return Err(Error::InvalidField(name.to_string()));
            }
            ordering.push(field.to_string());
        }
        self.ordering = ordering;
        Ok(self)
    }

    fn where_clause(&self, extra: Option<&str>) -> String {
        let mut conditions: Vec<String> = self
            .filters
            .iter()
            .map(|(field, value)| match value {
                SqlValue::Null => format!("{} IS NULL", quote_ident(field)),
                _ => format!("{} = ?", quote_ident(field)),
            })
            .collect();
        conditions.extend(extra.map(str::to_string));
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    // `id` is always the final tie-breaker so pages never overlap.
    fn order_clause(&self) -> String {
        let mut terms: Vec<String> = self
            .ordering
            .iter()
            .map(|field| match field.strip_prefix('-') {
                Some(name) => format!("{} DESC", quote_ident(name)),
                None => format!("{} ASC", quote_ident(field)),
            })
            .collect();
        if !self.ordering.iter().any(|f| f.trim_start_matches('-') == "id") {
            terms.push("\"id\" ASC".to_string());
        }
        format!(" ORDER BY {}", terms.join(", "))
    }

    fn select_sql(&self) -> String {
        let mut columns = vec![quote_ident("id")];
        columns.extend(self.model.fields().iter().map(|f| quote_ident(&f.name)));
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(self.model.table_name())
        )
    }

    fn bind_filters<'q>(&self, mut query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        for (_, value) in &self.filters {
            if *value != SqlValue::Null {
                query = bind_value(query, value);
            }
        }
        query
    }
}

async fn ensure_migrations_table(db: &Db) -> Result<()> {
    db.execute(&format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT UNIQUE,
            table_name TEXT UNIQUE,
            schema_sql TEXT,
            hash TEXT,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    ))
    .await
}

// Identifiers are checked against IDENTIFIER, so they never contain quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

// Simple helper to escape single quotes for SQL
fn escape_sql_quote(sql: &str) -> String {
    sql.replace('\'', "''")
}

// Helper function to hash a SQL string
fn hash(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Db {
    /// Connect (or create) a SQLite database at the given URI
    ///
    /// In-memory databases are private to a connection, so they get a
    /// single-connection pool.
    pub async fn connect(uri: &str) -> Result<Self> {
        info!("Connecting to SQLite database at URI: {}", uri);
        let mut options = SqlitePoolOptions::new();
        if uri.contains(":memory:") {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(uri).await?;
        info!("Connected to SQLite database: {}", uri);
        Ok(Db { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute an arbitrary SQL statement, e.g. DDL, INSERT, UPDATE.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing SQL: {}", sql);
        let result = self.pool.execute(sql).await;
        match &result {
            Ok(_) => info!("SQL executed successfully"),
            Err(e) => log::error!("SQL execution failed: {}", e),
        }
        result.map(|_| ()).map_err(Error::from)
    }

    /// Fetch all rows and map to a type implementing `FromRow`.
    pub async fn fetch_all<T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin>(
        &self,
        sql: &str,
    ) -> Result<Vec<T>> {
        debug!("Fetching rows with SQL: {}", sql);
        let result = sqlx::query_as(sql).fetch_all(&self.pool).await;
        match &result {
            Ok(rows) => info!("Fetched {} rows successfully", rows.len()),
            Err(e) => log::error!("Row fetch failed: {}", e),
        }
        result.map_err(Error::from)
    }

    /// Number of records matched by `query`.
    pub async fn count(&self, query: &Query) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {}{}",
            quote_ident(query.model.table_name()),
            query.where_clause(None)
        );
        debug!("Counting rows with SQL: {}", sql);
        let row = query
            .bind_filters(sqlx::query(&sql))
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Records matched by `query`, skipping `offset` and returning at most `limit`.
    pub async fn fetch(
        &self,
        query: &Query,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let sql = format!(
            "{}{}{} LIMIT ? OFFSET ?",
            query.select_sql(),
            query.where_clause(None),
            query.order_clause()
        );
        debug!("Fetching records with SQL: {}", sql);
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = query
            .bind_filters(sqlx::query(&sql))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        info!("Fetched {} records from `{}`", rows.len(), query.model.table_name());
        rows.iter()
            .map(|row| Record::from_row(&query.model, row))
            .collect()
    }

    /// The record with primary key `id`, if `query` matches it.
    pub async fn get(&self, query: &Query, id: i64) -> Result<Option<Record>> {
        let sql = format!(
            "{}{}",
            query.select_sql(),
            query.where_clause(Some("\"id\" = ?"))
        );
        debug!("Fetching record {} with SQL: {}", id, sql);
        let row = query
            .bind_filters(sqlx::query(&sql))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Record::from_row(&query.model, &row))
            .transpose()
    }

    /// Insert a record. Fields absent from `values` get their default.
    pub async fn insert(
        &self,
        meta: &Arc<ModelMeta>,
        values: &BTreeMap<String, SqlValue>,
    ) -> Result<Record> {
        let mut columns = Vec::new();
        let mut bound = Vec::new();
        for field in meta.fields() {
            columns.push(quote_ident(&field.name));
            bound.push(
                values
                    .get(&field.name)
                    .cloned()
                    .unwrap_or_else(|| field.missing_value()),
            );
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(meta.table_name()))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(meta.table_name()),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        debug!("Inserting with SQL: {}", sql);
        let mut statement = sqlx::query(&sql);
        for value in &bound {
            statement = bind_value(statement, value);
        }
        let id = statement.execute(&self.pool).await?.last_insert_rowid();
        info!("Inserted record {} into `{}`", id, meta.table_name());
        self.get(&Query::new(meta.clone()), id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))
    }

    /// Update the named columns of record `id`. Returns the number of rows changed.
    pub async fn update(
        &self,
        meta: &ModelMeta,
        id: i64,
        values: &BTreeMap<String, SqlValue>,
    ) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        for name in values.keys() {
            if meta.get_field(name).is_none() {
                return Err(Error::InvalidField(name.clone()));
            }
        }
        let assignments: Vec<String> = values
            .keys()
            .map(|name| format!("{} = ?", quote_ident(name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE \"id\" = ?",
            quote_ident(meta.table_name()),
            assignments.join(", ")
        );
        debug!("Updating record {} with SQL: {}", id, sql);
        let mut statement = sqlx::query(&sql);
        for value in values.values() {
            statement = bind_value(statement, value);
        }
        let result = statement.bind(id).execute(&self.pool).await?;
        info!("Updated record {} in `{}`", id, meta.table_name());
        Ok(result.rows_affected())
    }

    /// Delete record `id`. Returns the number of rows removed.
    pub async fn delete(&self, meta: &ModelMeta, id: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE \"id\" = ?",
            quote_ident(meta.table_name())
        );
        debug!("Deleting record {} with SQL: {}", id, sql);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        info!("Deleted record {} from `{}`", id, meta.table_name());
        Ok(result.rows_affected())
    }
}

/// Applies file-based migrations located in the `migrations_dir` directory.
/// Each migration file should be a *.sql file.
/// Already-applied migrations are skipped based on filename tracking in __backbone_migrations.
pub async fn apply_migration_files(db: &Db, migrations_dir: &str) -> Result<()> {
    ensure_migrations_table(db).await?;

    // List .sql files in migrations directory, sorted by filename
    let mut files: Vec<_> = WalkDir::new(migrations_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|f| f.file_type().is_file())
        .filter(|f| f.path().extension().map(|e| e == "sql").unwrap_or(false))
        .collect();
    files.sort_by_key(|f| f.file_name().to_os_string());

    for entry in files {
        let filename = entry.file_name().to_string_lossy().to_string();
        let applied: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT filename FROM {MIGRATIONS_TABLE} WHERE filename = ?"
        ))
        .bind(&filename)
        .fetch_optional(&db.pool)
        .await?;
        if applied.is_some() {
            info!("Migration `{}` already applied.", filename);
            continue;
        }

        let sql = fs::read_to_string(entry.path())?;
        info!("Applying migration file: {}", filename);
        db.execute(&sql).await?;
        sqlx::query(&format!(
            "INSERT INTO {MIGRATIONS_TABLE} (filename) VALUES (?)"
        ))
        .bind(&filename)
        .execute(&db.pool)
        .await?;
        info!("Migration `{}` applied.", filename);
    }

    Ok(())
}
