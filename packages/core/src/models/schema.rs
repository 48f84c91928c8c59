//! Index Field Descriptors
//!
//! Each record type declares its indexed fields once, in
//! [`Record::describe`]. The resulting [`Schema`] is built on first use and
//! memoized in the [`SchemaRegistry`] shared by all sessions.
//!
//! A field is indexed under its index key. The default key is
//! `"{schema_id}.{field}"`; fields of different record types can share one
//! key to be listed and filtered together.

use crate::models::record::Record;
use crate::models::value::{ToValue, Value, ValueKind};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Malformed field registration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema '{schema_id}' registers field '{field}' more than once")]
    DuplicateField { schema_id: String, field: String },

    #[error("Schema '{schema_id}' registers a field with an empty name")]
    EmptyFieldName { schema_id: String },

    #[error("Schema '{schema_id}' has no indexed field '{field}'")]
    UnknownField { schema_id: String, field: String },
}

type FieldReader<R> = Box<dyn Fn(&R) -> Option<Value> + Send + Sync>;

/// One indexed field of a record type
pub struct FieldDescriptor<R> {
    name: String,
    index_key: String,
    kind: ValueKind,
    read: FieldReader<R>,
}

impl<R> FieldDescriptor<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Current value of the field on `record`
    pub fn read(&self, record: &R) -> Option<Value> {
        (self.read)(record)
    }
}

impl<R> std::fmt::Debug for FieldDescriptor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("index_key", &self.index_key)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Default index key for a field
pub fn default_index_key(schema_id: &str, field: &str) -> String {
    format!("{}.{}", schema_id, field)
}

/// Collects field registrations inside [`Record::describe`]
pub struct SchemaBuilder<R> {
    schema_id: &'static str,
    fields: Vec<FieldDescriptor<R>>,
    error: Option<SchemaError>,
}

impl<R: 'static> SchemaBuilder<R> {
    fn new(schema_id: &'static str) -> Self {
        Self {
            schema_id,
            fields: Vec::new(),
            error: None,
        }
    }

    /// Index a field under its default key
    pub fn index<V, F>(&mut self, name: impl Into<String>, read: F) -> &mut Self
    where
        V: ToValue,
        F: Fn(&R) -> V + Send + Sync + 'static,
    {
        let name = name.into();
        let key = default_index_key(self.schema_id, &name);
        self.push(name, key, read)
    }

    /// Index a field under an explicit, possibly shared, key
    pub fn index_with_key<V, F>(
        &mut self,
        name: impl Into<String>,
        index_key: impl Into<String>,
        read: F,
    ) -> &mut Self
    where
        V: ToValue,
        F: Fn(&R) -> V + Send + Sync + 'static,
    {
        self.push(name.into(), index_key.into(), read)
    }

    fn push<V, F>(&mut self, name: String, index_key: String, read: F) -> &mut Self
    where
        V: ToValue,
        F: Fn(&R) -> V + Send + Sync + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        if name.is_empty() {
            self.error = Some(SchemaError::EmptyFieldName {
                schema_id: self.schema_id.to_string(),
            });
            return self;
        }
        if self.fields.iter().any(|field| field.name == name) {
            self.error = Some(SchemaError::DuplicateField {
                schema_id: self.schema_id.to_string(),
                field: name,
            });
            return self;
        }

        self.fields.push(FieldDescriptor {
            name,
            index_key,
            kind: V::KIND,
            read: Box::new(move |record| read(record).to_value()),
        });
        self
    }
}

/// The indexed fields of one record type
pub struct Schema<R> {
    schema_id: &'static str,
    fields: Vec<FieldDescriptor<R>>,
}

impl<R: Record> Schema<R> {
    /// Run the type's registration and validate it
    pub fn build() -> Result<Self, SchemaError> {
        let mut builder = SchemaBuilder::new(R::SCHEMA_ID);
        R::describe(&mut builder);
        if let Some(error) = builder.error {
            return Err(error);
        }
        Ok(Self {
            schema_id: R::SCHEMA_ID,
            fields: builder.fields,
        })
    }
}

impl<R> Schema<R> {
    pub fn schema_id(&self) -> &'static str {
        self.schema_id
    }

    pub fn fields(&self) -> &[FieldDescriptor<R>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&FieldDescriptor<R>, SchemaError> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| SchemaError::UnknownField {
                schema_id: self.schema_id.to_string(),
                field: name.to_string(),
            })
    }
}

/// Memoized [`Schema`] per record type
///
/// Entries are built once and never invalidated.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<R: Record>(&self) -> Result<Arc<Schema<R>>, SchemaError> {
        let type_id = TypeId::of::<R>();

        if let Some(entry) = self.cache.read().await.get(&type_id) {
            if let Ok(schema) = Arc::clone(entry).downcast::<Schema<R>>() {
                return Ok(schema);
            }
        }

        let schema = Arc::new(Schema::<R>::build()?);
        tracing::debug!(
            "Registered {} indexed field(s) for schema '{}'",
            schema.fields().len(),
            R::SCHEMA_ID
        );

        let mut cache = self.cache.write().await;
        let entry = cache
            .entry(type_id)
            .or_insert_with(|| schema.clone() as Arc<dyn Any + Send + Sync>);
        Ok(Arc::clone(entry).downcast::<Schema<R>>().unwrap_or(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::RecordMeta;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Book {
        #[serde(skip)]
        meta: RecordMeta,
        title: String,
        pages: Option<u32>,
    }

    impl Record for Book {
        const SCHEMA_ID: &'static str = "test.Book";

        fn meta(&self) -> &RecordMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut RecordMeta {
            &mut self.meta
        }

        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .index_with_key("title", "shared.titles", |b: &Book| b.title.clone())
                .index("pages", |b: &Book| b.pages);
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Broken {
        #[serde(skip)]
        meta: RecordMeta,
        a: i32,
    }

    impl Record for Broken {
        const SCHEMA_ID: &'static str = "test.Broken";

        fn meta(&self) -> &RecordMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut RecordMeta {
            &mut self.meta
        }

        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.index("a", |r: &Broken| r.a).index("a", |r: &Broken| r.a);
        }
    }

    #[test]
    fn test_descriptors_follow_registration() {
        let schema = Schema::<Book>::build().unwrap();

        let title = schema.field("title").unwrap();
        assert_eq!(title.index_key(), "shared.titles");
        assert_eq!(title.kind(), ValueKind::Text);

        let pages = schema.field("pages").unwrap();
        assert_eq!(pages.index_key(), "test.Book.pages");
        assert_eq!(pages.kind(), ValueKind::Numeric);

        let book = Book {
            title: "Dune".into(),
            ..Default::default()
        };
        assert_eq!(title.read(&book), Some(Value::Text("Dune".into())));
        assert_eq!(pages.read(&book), None);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let schema = Schema::<Book>::build().unwrap();
        assert!(matches!(
            schema.field("author"),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        assert!(matches!(
            Schema::<Broken>::build(),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[tokio::test]
    async fn test_registry_memoizes() {
        let registry = SchemaRegistry::new();
        let first = registry.get::<Book>().await.unwrap();
        let second = registry.get::<Book>().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
