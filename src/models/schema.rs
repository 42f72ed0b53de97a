//! Document schema definitions.
//!
//! A [`SchemaDefinition`] is what applications hand to a connection: field
//! declarations plus optional behaviors, plugins, virtuals and indexes. It is
//! compiled once into a [`Schema`], which drivers receive opaquely when a
//! model is bound on a database.
//!
//! Compilation order is fixed: fields and options, then methods and statics,
//! then plugins (which may add fields or indexes), then virtuals, then the
//! declared indexes.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-document behavior: receives the document and call arguments.
pub type Method = Arc<dyn Fn(&Value, &[Value]) -> Value + Send + Sync>;

/// Per-model behavior: receives call arguments only.
pub type Static = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Computed property getter.
pub type Getter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Schema plugin registration.
#[derive(Clone)]
pub enum Plugin {
    /// Plugin applied without options.
    Function(Arc<dyn Fn(&mut Schema) + Send + Sync>),
    /// Plugin applied with an options document.
    WithOptions {
        register: Arc<dyn Fn(&mut Schema, &Value) + Send + Sync>,
        options: Value,
    },
}

impl Plugin {
    /// Create a plugin without options.
    pub fn new(register: impl Fn(&mut Schema) + Send + Sync + 'static) -> Self {
        Self::Function(Arc::new(register))
    }

    /// Create a plugin with an options document.
    pub fn with_options(
        register: impl Fn(&mut Schema, &Value) + Send + Sync + 'static,
        options: Value,
    ) -> Self {
        Self::WithOptions {
            register: Arc::new(register),
            options,
        }
    }

    fn apply(&self, schema: &mut Schema) {
        match self {
            Self::Function(register) => register(schema),
            Self::WithOptions { register, options } => register(schema, options),
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Plugin::Function"),
            Self::WithOptions { options, .. } => f
                .debug_struct("Plugin::WithOptions")
                .field("options", options)
                .finish_non_exhaustive(),
        }
    }
}

/// Declaration of a computed property.
#[derive(Clone)]
pub enum VirtualSpec {
    /// Configure the virtual field in code, e.g. to attach a getter.
    Configure(Arc<dyn Fn(&mut VirtualField) + Send + Sync>),
    /// Plain options, e.g. a `ref`/`localField`/`foreignField` population spec.
    Options(Value),
}

impl std::fmt::Debug for VirtualSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configure(_) => f.write_str("VirtualSpec::Configure"),
            Self::Options(options) => f.debug_tuple("VirtualSpec::Options").field(options).finish(),
        }
    }
}

/// A compiled computed property.
#[derive(Clone)]
pub struct VirtualField {
    name: String,
    getter: Option<Getter>,
    options: Value,
}

impl VirtualField {
    fn new(name: impl Into<String>, options: Value) -> Self {
        Self {
            name: name.into(),
            getter: None,
            options,
        }
    }

    /// Attach a getter.
    pub fn get(&mut self, getter: impl Fn(&Value) -> Value + Send + Sync + 'static) -> &mut Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    /// Evaluate the getter against a document. None when no getter is attached.
    pub fn evaluate(&self, document: &Value) -> Option<Value> {
        self.getter.as_ref().map(|getter| getter(document))
    }
}

impl std::fmt::Debug for VirtualField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualField")
            .field("name", &self.name)
            .field("has_getter", &self.getter.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Index declaration. Missing `fields`/`options` default to empty documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl IndexSpec {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            options: Map::new(),
        }
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }
}

/// Serializable part of a schema definition (fields, options, collection, indexes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    options: Map<String, Value>,
    #[serde(default, alias = "collectionName")]
    collection: Option<String>,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

/// Application-supplied schema definition.
#[derive(Clone, Default)]
pub struct SchemaDefinition {
    document: SchemaDocument,
    methods: BTreeMap<String, Method>,
    statics: BTreeMap<String, Static>,
    plugins: Vec<Plugin>,
    virtuals: Vec<(String, VirtualSpec)>,
}

impl SchemaDefinition {
    /// Create a definition from field declarations.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            document: SchemaDocument {
                fields,
                ..SchemaDocument::default()
            },
            ..Self::default()
        }
    }

    /// Load the declarative part of a definition from JSON.
    ///
    /// Recognised keys: `fields`, `options`, `collection` (or `collectionName`), `indexes`.
    pub fn from_json(value: Value) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_value(value)?;
        Ok(Self {
            document,
            ..Self::default()
        })
    }

    /// Set schema options.
    pub fn options(mut self, options: Map<String, Value>) -> Self {
        self.document.options = options;
        self
    }

    /// Set the collection name models are bound to. Defaults to the model name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.document.collection = Some(collection.into());
        self
    }

    /// Add a per-document method.
    pub fn method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&Value, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Add a per-model static.
    pub fn static_fn(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.statics.insert(name.into(), Arc::new(function));
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn virtual_field(mut self, name: impl Into<String>, spec: VirtualSpec) -> Self {
        self.virtuals.push((name.into(), spec));
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.document.indexes.push(index);
        self
    }

    /// Compile into a schema.
    pub fn compile(&self) -> Schema {
        let mut schema = Schema::new(self.document.fields.clone(), self.document.options.clone());
        schema.collection = self.document.collection.clone();
        schema.methods = self.methods.clone();
        schema.statics = self.statics.clone();

        for plugin in &self.plugins {
            plugin.apply(&mut schema);
        }

        for (name, spec) in &self.virtuals {
            match spec {
                VirtualSpec::Configure(configure) => configure(schema.virtual_field(name)),
                VirtualSpec::Options(options) => {
                    schema
                        .virtuals
                        .insert(name.clone(), VirtualField::new(name.clone(), options.clone()));
                }
            }
        }

        for index in &self.document.indexes {
            schema.index(index.clone());
        }

        schema
    }
}

impl std::fmt::Debug for SchemaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDefinition")
            .field("document", &self.document)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugins.len())
            .field("virtuals", &self.virtuals.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

/// Compiled schema, passed opaquely to drivers.
#[derive(Clone, Default)]
pub struct Schema {
    fields: Map<String, Value>,
    options: Map<String, Value>,
    collection: Option<String>,
    methods: BTreeMap<String, Method>,
    statics: BTreeMap<String, Static>,
    virtuals: BTreeMap<String, VirtualField>,
    indexes: Vec<IndexSpec>,
}

impl Schema {
    pub fn new(fields: Map<String, Value>, options: Map<String, Value>) -> Self {
        Self {
            fields,
            options,
            ..Self::default()
        }
    }

    /// Add or replace a field declaration.
    pub fn add_field(&mut self, name: impl Into<String>, declaration: Value) -> &mut Self {
        self.fields.insert(name.into(), declaration);
        self
    }

    pub fn index(&mut self, index: IndexSpec) -> &mut Self {
        self.indexes.push(index);
        self
    }

    /// Get or create a virtual field for configuration.
    pub fn virtual_field(&mut self, name: &str) -> &mut VirtualField {
        self.virtuals
            .entry(name.to_string())
            .or_insert_with(|| VirtualField::new(name, Value::Null))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Collection a model named `model_name` is stored in.
    pub fn collection_for(&self, model_name: &str) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| model_name.to_string())
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn virtual_names(&self) -> Vec<&str> {
        self.virtuals.keys().map(String::as_str).collect()
    }

    pub fn get_virtual(&self, name: &str) -> Option<&VirtualField> {
        self.virtuals.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn has_static(&self, name: &str) -> bool {
        self.statics.contains_key(name)
    }

    /// Invoke a per-document method.
    pub fn call_method(&self, name: &str, document: &Value, args: &[Value]) -> Option<Value> {
        self.methods.get(name).map(|method| method(document, args))
    }

    /// Invoke a per-model static.
    pub fn call_static(&self, name: &str, args: &[Value]) -> Option<Value> {
        self.statics.get(name).map(|function| function(args))
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("options", &self.options)
            .field("collection", &self.collection)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .field("virtuals", &self.virtuals)
            .field("indexes", &self.indexes)
            .finish()
    }
}

/// Named schemas shared by every database of a connection.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a definition, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        definition: &SchemaDefinition,
    ) -> Arc<Schema> {
        let schema = Arc::new(definition.compile());
        self.schemas.insert(name.into(), Arc::clone(&schema));
        schema
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, definition: &SchemaDefinition) -> Self {
        self.register(name, definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Schema names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Schema>)> {
        self.schemas.iter()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
