//! Declarative reconstruction capability.
//!
//! Configuration objects that can be rebuilt from a plain document implement
//! [`Declarative`]. The object-safe [`DeclarativeObject`] lets the serializer
//! carry such values behind `Arc<dyn DeclarativeObject>` and emit a
//! [`ClassDescriptor`] for them.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::fmt;

use crate::constants::document::{TAG_CLASS, TYPE_FIELD};
use crate::errors::ValidationError;
use crate::types::{Document, ModulePath};

/// A value that converts to and from a declarative document.
pub trait Declarative: Sized {
    /// Class name under which the type is registered.
    const CLASS: &'static str;

    /// Plain document describing the configuration.
    fn to_declaration(&self) -> Result<Document, ValidationError>;

    /// Rebuild from a document produced by [`Declarative::to_declaration`].
    fn from_declaration(document: &Document) -> Result<Self, ValidationError>;
}

/// Object-safe view of a declaratively reconstructible value.
pub trait DeclarativeObject: fmt::Debug + Send + Sync + 'static {
    /// Module the class is registered under.
    fn module(&self) -> &str;

    /// Registered class name.
    fn class_name(&self) -> &str;

    /// Document the value can be rebuilt from.
    fn declaration(&self) -> Result<Document, ValidationError>;

    /// The value as [`Any`], for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Value equality over configuration.
    fn eq_object(&self, other: &dyn DeclarativeObject) -> bool;
}

impl PartialEq for dyn DeclarativeObject {
    fn eq(&self, other: &Self) -> bool {
        self.eq_object(other)
    }
}

/// `{type: "class", module, name, dict}` descriptor of a reconstructible value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Module the class is registered under.
    pub module: ModulePath,
    /// Registered class name.
    pub name: String,
    /// Declaration the object is rebuilt from.
    pub dict: Document,
}

impl ClassDescriptor {
    /// Describe a live object.
    pub fn of(object: &dyn DeclarativeObject) -> Result<Self, ValidationError> {
        Ok(Self {
            module: object.module().to_string(),
            name: object.class_name().to_string(),
            dict: object.declaration()?,
        })
    }

    /// Registry key `module::name`.
    pub fn path(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }

    /// Tagged document form.
    pub fn to_document(&self) -> Document {
        json!({
            TYPE_FIELD: TAG_CLASS,
            "module": self.module,
            "name": self.name,
            "dict": self.dict,
        })
    }

    /// Parse a tagged (or untagged) class descriptor.
    pub fn from_document(document: &Document) -> Result<Self, ValidationError> {
        if let Some(tag) = document.get(TYPE_FIELD)
            && tag != TAG_CLASS
        {
            return Err(ValidationError::MalformedDocument(format!(
                "expected a class descriptor, got type {tag}"
            )));
        }
        let field = |key: &str| {
            document
                .get(key)
                .and_then(Document::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ValidationError::MalformedDocument(format!(
                        "class descriptor is missing '{key}'"
                    ))
                })
        };
        Ok(Self {
            module: field("module")?,
            name: field("name")?,
            dict: document.get("dict").cloned().unwrap_or(Document::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_descriptor_parses_its_document() {
        let descriptor = ClassDescriptor {
            module: "crval::segmentation".to_string(),
            name: "ByBins".to_string(),
            dict: json!({ "bins": [1.0, 2.0] }),
        };
        let document = descriptor.to_document();
        assert_eq!(document["type"], "class");
        assert_eq!(ClassDescriptor::from_document(&document).unwrap(), descriptor);
        assert_eq!(descriptor.path(), "crval::segmentation::ByBins");
    }

    #[test]
    fn class_descriptor_rejects_other_tags() {
        let document = json!({ "type": "function", "module": "m", "name": "f" });
        assert!(ClassDescriptor::from_document(&document).is_err());
    }
}
