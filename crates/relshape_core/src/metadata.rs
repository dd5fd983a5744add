//! Model metadata consumed by translation.
//!
//! Building the model is the host's job, the pipeline only reads it through
//! [`MetadataProvider`].

use std::fmt::Debug;
use std::sync::Arc;

use crate::translate::descriptor::OperationDescriptor;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    pub name: String,
    pub column: String,
    /// Type of the property, without nullability.
    pub datatype: DataType,
    pub nullable: bool,
}

impl PropertyMetadata {
    pub fn new(name: impl Into<String>, column: impl Into<String>, datatype: DataType) -> Self {
        PropertyMetadata {
            name: name.into(),
            column: column.into(),
            datatype,
            nullable: false,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn datatype(&self) -> DataType {
        if self.nullable {
            self.datatype.clone().nullable()
        } else {
            self.datatype.clone()
        }
    }
}

/// Relationship from one entity to another.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationMetadata {
    pub name: String,
    /// Name of the target entity.
    pub target: String,
    /// One-to-many if true, otherwise a reference.
    pub is_collection: bool,
    /// If a reference navigation always has a target. Required references
    /// are joined with an inner join.
    pub required: bool,
    /// Property names on the source entity used for the join.
    pub source_properties: Vec<String>,
    /// Property names on the target entity, positionally matching
    /// `source_properties`.
    pub target_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub properties: Vec<PropertyMetadata>,
    /// Property names making up the primary key.
    pub primary_key: Vec<String>,
    pub navigations: Vec<NavigationMetadata>,
}

impl EntityMetadata {
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationMetadata> {
        self.navigations.iter().find(|n| n.name == name)
    }
}

/// A queryable user defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionMetadata {
    /// Name of the function in the database.
    pub sql_name: String,
    pub return_type: DataType,
    pub is_aggregate: bool,
}

pub trait MetadataProvider: Debug + Sync + Send {
    /// Get the metadata for an entity by name.
    fn entity(&self, name: &str) -> Option<Arc<EntityMetadata>>;

    /// Get the user defined function a method maps to, if any.
    fn function(&self, method: &OperationDescriptor) -> Option<FunctionMetadata>;
}
