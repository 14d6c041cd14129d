//! Generic JSON API view over one model.
//!
//! One [`ApiView`] answers both the collection URL (`GET` list, `POST`
//! create) and the detail URL (`GET` read, `PUT` update, `DELETE` remove).
//! Validation is delegated to a model form, permission checks to the
//! request's user through [`ViewHooks`], which applications override to
//! narrow the queryset or refine permissions.

use crate::auth::{Action, permission_codename};
use crate::error::{Error, Result};
use crate::forms::{FormOptions, ModelForm, form_factory};
use crate::orm::{ModelMeta, Query, Record, RecordFn};
use crate::paginator::{PageError, Paginator};
use crate::router::{AppState, RequestContext, Response};
use crate::serializers::{AllFieldsSerializer, json_dumps};
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const PERMISSION_DENIED: &str = "You do not have permission to perform this action.";
pub const INVALID_JSON: &str = "Unable to parse JSON request body.";
pub const PAGE_NOT_AN_INTEGER: &str = "Invalid `page` parameter: Not a valid integer.";
pub const PAGE_OUT_OF_RANGE: &str = "Invalid `page` parameter: Out of range.";

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];
const JSON_CONTENT_TYPE: &str = "application/json";

/// An entry of a view's `display_fields`.
#[derive(Clone)]
pub enum DisplayField {
    /// Resolved against view methods, then model methods, then database fields.
    Name(String),
    /// Called with the record; serialized under `name`.
    Computed { name: String, func: RecordFn },
}

impl DisplayField {
    pub fn computed<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        DisplayField::Computed {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DisplayField::Name(name) | DisplayField::Computed { name, .. } => name,
        }
    }
}

impl fmt::Debug for DisplayField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayField::Name(name) => f.debug_tuple("Name").field(name).finish(),
            DisplayField::Computed { name, .. } => f.debug_tuple("Computed").field(name).finish(),
        }
    }
}

impl From<&str> for DisplayField {
    fn from(name: &str) -> Self {
        DisplayField::Name(name.to_string())
    }
}

impl From<String> for DisplayField {
    fn from(name: String) -> Self {
        DisplayField::Name(name)
    }
}

/// Overridable decisions of an [`ApiView`].
///
/// The permission checks default to the model's `add`, `change` and
/// `delete` codenames; the `*_for_data` checks see the cleaned form data and
/// allow everything by default.
#[async_trait]
pub trait ViewHooks: Send + Sync {
    /// Narrow the records this view can see, e.g. to the requesting user's.
    async fn filter_queryset(
        &self,
        _request: &RequestContext,
        _state: &AppState,
        query: Query,
    ) -> Result<Query> {
        Ok(query)
    }

    async fn has_add_permission(&self, request: &RequestContext, model: &ModelMeta) -> bool {
        request
            .user
            .has_perm(&permission_codename(model, Action::Add))
    }

    async fn has_add_permission_for_data(
        &self,
        _request: &RequestContext,
        _cleaned_data: &BTreeMap<String, Value>,
    ) -> bool {
        true
    }

    async fn has_update_permission(
        &self,
        request: &RequestContext,
        model: &ModelMeta,
        _obj: &Record,
    ) -> bool {
        request
            .user
            .has_perm(&permission_codename(model, Action::Change))
    }

    async fn has_update_permission_for_data(
        &self,
        _request: &RequestContext,
        _cleaned_data: &BTreeMap<String, Value>,
    ) -> bool {
        true
    }

    async fn has_delete_permission(
        &self,
        request: &RequestContext,
        model: &ModelMeta,
        _obj: &Record,
    ) -> bool {
        request
            .user
            .has_perm(&permission_codename(model, Action::Delete))
    }
}

/// Codename-based permissions, unfiltered queryset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ViewHooks for DefaultHooks {}

pub struct ApiView {
    model: Arc<ModelMeta>,
    display_fields: Vec<DisplayField>,
    fields: Vec<String>,
    form: Option<FormOptions>,
    ordering: Vec<String>,
    paginate_by: Option<usize>,
    methods: BTreeMap<String, RecordFn>,
    hooks: Arc<dyn ViewHooks>,
}

impl ApiView {
    pub fn new(model: Arc<ModelMeta>) -> Self {
        ApiView {
            model,
            display_fields: Vec::new(),
            fields: Vec::new(),
            form: None,
            ordering: Vec::new(),
            paginate_by: None,
            methods: BTreeMap::new(),
            hooks: Arc::new(DefaultHooks),
        }
    }

    /// Fields returned by reads, after `id`.
    pub fn display_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<DisplayField>,
    {
        self.display_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Fields accepted by create and update.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn form(mut self, form: FormOptions) -> Self {
        self.form = Some(form);
        self
    }

    pub fn ordering<I, S>(mut self, ordering: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = ordering.into_iter().map(Into::into).collect();
        self
    }

    /// Enables the `page` query parameter on the collection.
    pub fn paginate_by(mut self, per_page: usize) -> Self {
        self.paginate_by = Some(per_page);
        self
    }

    /// A view-level computed attribute, usable in `display_fields`.
    pub fn method<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(func));
        self
    }

    pub fn hooks(mut self, hooks: impl ViewHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn model(&self) -> &Arc<ModelMeta> {
        &self.model
    }

    /// Reject configurations that could only fail at request time.
    pub fn check(&self) -> Result<()> {
        Query::new(self.model.clone()).order_by(self.ordering.as_slice())?;
        for field in &self.display_fields {
            if let DisplayField::Name(name) = field {
                if !self.methods.contains_key(name)
                    && self.model.method(name).is_none()
                    && !self.model.has_db_field(name)
                {
                    return Err(Error::InvalidField(name.clone()));
                }
            }
        }
        form_factory(&self.model, self.form.as_ref(), &self.fields)?;
        Ok(())
    }

    /// Route a request by method. Internal errors become a `500`.
    pub async fn dispatch(&self, request: &RequestContext, state: &AppState) -> Response {
        let id = request.param("id");
        // Detail URLs only match unsigned decimal ids.
        if id.is_some_and(|id| id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit())) {
            return Response::not_found();
        }
        let result = match request.method.as_str() {
            "GET" | "HEAD" => self.get(request, state, id).await,
            "POST" => self.post(request, state, id).await,
            "PUT" => self.put(request, state, id).await,
            "DELETE" => self.delete(request, state, id).await,
            "OPTIONS" => Ok(Response::ok("").with_header("Allow", ALLOWED_METHODS.join(", "))),
            _ => {
                warn!(
                    "Method Not Allowed ({}): {}",
                    request.method, request.path
                );
                Ok(Response::method_not_allowed(ALLOWED_METHODS))
            }
        };
        result.unwrap_or_else(|e| {
            error!(
                "{} {} failed for `{}`: {}",
                request.method,
                request.path,
                self.model.label(),
                e
            );
            if state.settings.debug {
                Response::new(500, format!("500 Internal Server Error: {e}"))
            } else {
                Response::server_error()
            }
        })
    }

    /// Every record of the model, in `ordering`, narrowed by the hooks.
    pub async fn queryset(&self, request: &RequestContext, state: &AppState) -> Result<Query> {
        let query = Query::new(self.model.clone()).order_by(self.ordering.as_slice())?;
        self.hooks.filter_queryset(request, state, query).await
    }

    /// Handles get requests for either the collection or an object detail.
    pub async fn get(
        &self,
        request: &RequestContext,
        state: &AppState,
        id: Option<&str>,
    ) -> Result<Response> {
        match id {
            Some(id) => match self.get_object_or_404(request, state, id).await? {
                Some(obj) => self.get_object_detail(&obj),
                None => Ok(Response::not_found()),
            },
            None => self.get_collection(request, state).await,
        }
    }

    pub fn get_object_detail(&self, obj: &Record) -> Result<Response> {
        let data = self.serialize(obj, &self.read_fields())?;
        self.json_response(&data, 200)
    }

    pub async fn get_collection(
        &self,
        request: &RequestContext,
        state: &AppState,
    ) -> Result<Response> {
        let query = self.queryset(request, state).await?;

        let (offset, limit) = match self.paginate_by {
            Some(per_page) => {
                let count = state.db.count(&query).await?;
                let page = request.query_param("page").unwrap_or("1");
                match Paginator::new(count, per_page).page(page) {
                    Ok(page) => (page.offset, Some(page.limit)),
                    Err(PageError::NotAnInteger) => {
                        return Ok(Response::bad_request(PAGE_NOT_AN_INTEGER));
                    }
                    Err(PageError::EmptyPage) => {
                        return Ok(Response::bad_request(PAGE_OUT_OF_RANGE));
                    }
                }
            }
            None => (0, None),
        };

        let fields = self.read_fields();
        let data = state
            .db
            .fetch(&query, offset, limit)
            .await?
            .iter()
            .map(|obj| self.serialize(obj, &fields))
            .collect::<Result<Vec<_>>>()?;
        self.json_response(&data, 200)
    }

    /// Handles post requests. Only the collection accepts them.
    pub async fn post(
        &self,
        request: &RequestContext,
        state: &AppState,
        id: Option<&str>,
    ) -> Result<Response> {
        if id.is_some() {
            return Ok(Response::forbidden(""));
        }
        if !self.hooks.has_add_permission(request, &self.model).await {
            debug!("Add permission denied on `{}`", self.model.label());
            return Ok(Response::forbidden(PERMISSION_DENIED));
        }
        self.add_object(request, state).await
    }

    /// Validates the payload, saves a new record and answers `201` with its
    /// details and a `Location` header.
    pub async fn add_object(&self, request: &RequestContext, state: &AppState) -> Result<Response> {
        let Some(data) = parse_body(request) else {
            return Ok(Response::bad_request(INVALID_JSON));
        };

        let mut form = self.get_form_instance(data, None)?;
        if !form.is_valid() {
            return self.json_response(form.errors(), 400);
        }
        if !self
            .hooks
            .has_add_permission_for_data(request, form.cleaned_data())
            .await
        {
            debug!("Add permission denied for submitted data on `{}`", self.model.label());
            return Ok(Response::forbidden(PERMISSION_DENIED));
        }

        let obj = form.save(&state.db).await?;

        let mut response = self.get_object_detail(&obj)?;
        response.status_code = 201;
        let url_name = format!(
            "backbone:{}_{}_detail",
            self.model.app_label(),
            self.model.module_name()
        );
        match state.urls.reverse(&url_name, &[&obj.id.to_string()]) {
            Ok(location) => {
                response.headers.insert("Location".to_string(), location);
            }
            Err(e) => warn!("Created `{}` {} without a Location: {}", self.model.label(), obj.id, e),
        }
        Ok(response)
    }

    /// Handles put requests. Only object details accept them.
    pub async fn put(
        &self,
        request: &RequestContext,
        state: &AppState,
        id: Option<&str>,
    ) -> Result<Response> {
        let Some(id) = id else {
            return Ok(Response::forbidden(""));
        };
        let Some(obj) = self.get_object_or_404(request, state, id).await? else {
            return Ok(Response::not_found());
        };
        if !self
            .hooks
            .has_update_permission(request, &self.model, &obj)
            .await
        {
            debug!("Change permission denied on `{}` {}", self.model.label(), obj.id);
            return Ok(Response::forbidden(PERMISSION_DENIED));
        }
        self.update_object(request, state, obj).await
    }

    pub async fn update_object(
        &self,
        request: &RequestContext,
        state: &AppState,
        obj: Record,
    ) -> Result<Response> {
        let Some(data) = parse_body(request) else {
            return Ok(Response::bad_request(INVALID_JSON));
        };

        let mut form = self.get_form_instance(data, Some(obj))?;
        if !form.is_valid() {
            return self.json_response(form.errors(), 400);
        }
        if !self
            .hooks
            .has_update_permission_for_data(request, form.cleaned_data())
            .await
        {
            debug!("Change permission denied for submitted data on `{}`", self.model.label());
            return Ok(Response::forbidden(PERMISSION_DENIED));
        }

        let obj = form.save(&state.db).await?;
        self.get_object_detail(&obj)
    }

    /// A form bound to `data`; `instance` is the record being edited.
    pub fn get_form_instance(
        &self,
        data: Map<String, Value>,
        instance: Option<Record>,
    ) -> Result<ModelForm> {
        Ok(form_factory(&self.model, self.form.as_ref(), &self.fields)?.bind(data, instance))
    }

    /// Handles delete requests. Only object details accept them.
    pub async fn delete(
        &self,
        request: &RequestContext,
        state: &AppState,
        id: Option<&str>,
    ) -> Result<Response> {
        let Some(id) = id else {
            return Ok(Response::forbidden(""));
        };
        let Some(obj) = self.get_object_or_404(request, state, id).await? else {
            return Ok(Response::not_found());
        };
        if !self
            .hooks
            .has_delete_permission(request, &self.model, &obj)
            .await
        {
            debug!("Delete permission denied on `{}` {}", self.model.label(), obj.id);
            return Ok(Response::forbidden(PERMISSION_DENIED));
        }
        self.delete_object(state, &obj).await
    }

    pub async fn delete_object(&self, state: &AppState, obj: &Record) -> Result<Response> {
        state.db.delete(&self.model, obj.id).await?;
        Ok(Response::no_content())
    }

    /// Serialize one record, resolving each field in turn: a computed field
    /// is called; a name is looked up as a view method, a model method, then
    /// a database field.
    pub fn serialize(&self, obj: &Record, fields: &[DisplayField]) -> Result<Map<String, Value>> {
        let mut data = Map::new();
        let mut remaining = Vec::new();
        for field in fields {
            match field {
                DisplayField::Computed { name, func } => {
                    data.insert(name.clone(), func(obj));
                }
                DisplayField::Name(name) => {
                    if let Some(func) = self.methods.get(name) {
                        data.insert(name.clone(), func(obj));
                    } else if let Some(func) = self.model.method(name) {
                        data.insert(name.clone(), func(obj));
                    } else if self.model.has_db_field(name) {
                        remaining.push(name.as_str());
                    } else {
                        return Err(Error::InvalidField(name.clone()));
                    }
                }
            }
        }

        let serialized =
            AllFieldsSerializer.serialize(&self.model, std::slice::from_ref(obj), remaining.as_slice());
        if let Some(object) = serialized.into_iter().next() {
            data.extend(object.fields);
        }
        Ok(data)
    }

    fn read_fields(&self) -> Vec<DisplayField> {
        let mut fields = Vec::with_capacity(self.display_fields.len() + 1);
        fields.push(DisplayField::from("id"));
        fields.extend(self.display_fields.iter().cloned());
        fields
    }

    // Non-numeric ids can never match a row.
    async fn get_object_or_404(
        &self,
        request: &RequestContext,
        state: &AppState,
        id: &str,
    ) -> Result<Option<Record>> {
        let Ok(id) = id.parse::<i64>() else {
            return Ok(None);
        };
        let query = self.queryset(request, state).await?;
        state.db.get(&query, id).await
    }

    fn json_response<T: Serialize + ?Sized>(&self, data: &T, status: u16) -> Result<Response> {
        Ok(Response::new(status, json_dumps(data)?).with_header("Content-Type", JSON_CONTENT_TYPE))
    }
}

/// The request body as a JSON object, or `None` if it is anything else.
fn parse_body(request: &RequestContext) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(&request.body) {
        Ok(Value::Object(data)) => Some(data),
        _ => None,
    }
}
