//! DynamoDB tables.

use serde_json::{json, Value};

use crate::error::Result;
use crate::template::intrinsic::{concat, get_att, reference};
use crate::template::{Arn, RemovalPolicy, Resource, Scope, Stack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

impl AttributeType {
    fn as_str(self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
        }
    }
}

/// A key attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl Attribute {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::String,
        }
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::Number,
        }
    }
}

/// Global secondary index with `ALL` projection.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSecondaryIndex {
    pub index_name: String,
    pub partition_key: Attribute,
    pub sort_key: Option<Attribute>,
    pub read_capacity: u32,
    pub write_capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamViewType {
    NewImage,
    OldImage,
    NewAndOldImages,
    KeysOnly,
}

impl StreamViewType {
    fn as_str(self) -> &'static str {
        match self {
            StreamViewType::NewImage => "NEW_IMAGE",
            StreamViewType::OldImage => "OLD_IMAGE",
            StreamViewType::NewAndOldImages => "NEW_AND_OLD_IMAGES",
            StreamViewType::KeysOnly => "KEYS_ONLY",
        }
    }
}

/// Provisioned-capacity table properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TableProps {
    pub table_name: Option<String>,
    pub partition_key: Attribute,
    pub sort_key: Option<Attribute>,
    pub read_capacity: u32,
    pub write_capacity: u32,
    pub time_to_live_attribute: Option<String>,
    pub stream: Option<StreamViewType>,
    pub global_secondary_indexes: Vec<GlobalSecondaryIndex>,
}

impl TableProps {
    pub fn new(partition_key: Attribute) -> Self {
        Self {
            table_name: None,
            partition_key,
            sort_key: None,
            read_capacity: 5,
            write_capacity: 5,
            time_to_live_attribute: None,
            stream: None,
            global_secondary_indexes: Vec::new(),
        }
    }
}

/// Handle to a declared or existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: Value,
    pub arn: Value,
    /// Change stream ARN, when the table has a stream
    pub stream_arn: Option<Value>,
    pub index_names: Vec<String>,
}

impl Table {
    /// Declares an `AWS::DynamoDB::Table`. Tables are retained on teardown.
    pub fn new(stack: &mut Stack, scope: &Scope, props: TableProps) -> Result<Self> {
        let mut definitions: Vec<&Attribute> = Vec::new();
        let keys = std::iter::once(&props.partition_key)
            .chain(props.sort_key.as_ref())
            .chain(props.global_secondary_indexes.iter().flat_map(|index| {
                std::iter::once(&index.partition_key).chain(index.sort_key.as_ref())
            }));
        for attribute in keys {
            if !definitions.iter().any(|a| a.name == attribute.name) {
                definitions.push(attribute);
            }
        }

        let attribute_definitions: Vec<Value> = definitions
            .iter()
            .map(|a| json!({"AttributeName": a.name, "AttributeType": a.attribute_type.as_str()}))
            .collect();

        let mut resource = Resource::new("AWS::DynamoDB::Table")
            .property("AttributeDefinitions", attribute_definitions)
            .property("KeySchema", key_schema(&props.partition_key, props.sort_key.as_ref()))
            .property(
                "ProvisionedThroughput",
                throughput(props.read_capacity, props.write_capacity),
            )
            .property("TableName", props.table_name.clone())
            .removal_policy(RemovalPolicy::Retain);

        if let Some(attribute) = &props.time_to_live_attribute {
            resource.set(
                "TimeToLiveSpecification",
                json!({"AttributeName": attribute, "Enabled": true}),
            );
        }
        if let Some(view) = props.stream {
            resource.set("StreamSpecification", json!({"StreamViewType": view.as_str()}));
        }
        if !props.global_secondary_indexes.is_empty() {
            let indexes: Vec<Value> = props
                .global_secondary_indexes
                .iter()
                .map(|index| {
                    json!({
                        "IndexName": index.index_name,
                        "KeySchema": key_schema(&index.partition_key, index.sort_key.as_ref()),
                        "Projection": {"ProjectionType": "ALL"},
                        "ProvisionedThroughput": throughput(index.read_capacity, index.write_capacity),
                    })
                })
                .collect();
            resource.set("GlobalSecondaryIndexes", indexes);
        }

        let logical_id = stack.declare(scope, resource)?;
        Ok(Self {
            name: reference(&logical_id),
            arn: get_att(&logical_id, "Arn"),
            stream_arn: props
                .stream
                .map(|_| get_att(&logical_id, "StreamArn")),
            index_names: props
                .global_secondary_indexes
                .iter()
                .map(|index| index.index_name.clone())
                .collect(),
        })
    }

    /// A table owned by another stack or account.
    pub fn from_attributes(name: impl Into<Value>, stream_arn: Option<Value>, index_names: Vec<String>) -> Self {
        let name = name.into();
        Self {
            arn: Arn::new("dynamodb", "table").resource_name(name.clone()).build(),
            name,
            stream_arn,
            index_names,
        }
    }

    pub fn index_arn(&self, index_name: &str) -> Value {
        concat(vec![self.arn.clone(), Value::from(format!("/index/{}", index_name))])
    }
}

fn key_schema(partition_key: &Attribute, sort_key: Option<&Attribute>) -> Value {
    let mut schema = vec![json!({"AttributeName": partition_key.name, "KeyType": "HASH"})];
    if let Some(sort_key) = sort_key {
        schema.push(json!({"AttributeName": sort_key.name, "KeyType": "RANGE"}));
    }
    Value::Array(schema)
}

fn throughput(read: u32, write: u32) -> Value {
    json!({"ReadCapacityUnits": read, "WriteCapacityUnits": write})
}
