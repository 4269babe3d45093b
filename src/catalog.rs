//! Default data-lake tool catalog.
//!
//! One descriptor per backend operation, grouped by the agent role that
//! owns it. The registry built here is created once at startup and shared
//! read-only across requests.

use crate::agent::AgentRole;
use crate::error::RegistryError;
use crate::registry::{ParamSpec, ParamType, ToolDescriptor, ToolRegistry};

/// Builds the default registry with the full data-lake catalog.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateTool`] only if the catalog itself is
/// inconsistent, which would be a bug in this module.
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    for descriptor in catalog() {
        registry.register(descriptor)?;
    }
    Ok(registry)
}

/// Returns the full default catalog in registration order.
#[must_use]
pub fn catalog() -> Vec<ToolDescriptor> {
    vec![
        def_list_datasets(),
        def_get_dataset_schema(),
        def_find_columns(),
        def_dataset_row_count(),
        def_run_query(),
        def_column_statistics(),
        def_semantic_label_columns(),
        def_create_mapping(),
    ]
}

// ---------------------------------------------------------------------------
// Schema exploration
// ---------------------------------------------------------------------------

fn def_list_datasets() -> ToolDescriptor {
    ToolDescriptor {
        name: "list_datasets".to_string(),
        description: "List all datasets in the data lake with their names, tags, and \
                      version counts. Supports an optional name filter."
            .to_string(),
        parameters: vec![ParamSpec::optional(
            "name_filter",
            ParamType::String,
            "Substring to filter dataset names by.",
        )],
        output: "Array of dataset summaries (name, id, tags, versions).".to_string(),
        role: AgentRole::SchemaExplorer,
    }
}

fn def_get_dataset_schema() -> ToolDescriptor {
    ToolDescriptor {
        name: "get_dataset_schema".to_string(),
        description: "Retrieve the schema of a dataset: its columns with names, data types, \
                      semantic labels, and nullability."
            .to_string(),
        parameters: vec![ParamSpec::required(
            "dataset",
            ParamType::String,
            "Dataset name to describe.",
        )],
        output: "Object with the dataset name and an array of column definitions.".to_string(),
        role: AgentRole::SchemaExplorer,
    }
}

fn def_find_columns() -> ToolDescriptor {
    ToolDescriptor {
        name: "find_columns".to_string(),
        description: "Find all datasets containing a column whose name or semantic label \
                      matches the given term. Returns the matching datasets and columns."
            .to_string(),
        parameters: vec![
            ParamSpec::required("column", ParamType::String, "Column name or label to search for."),
            ParamSpec::optional("limit", ParamType::Integer, "Maximum matches to return."),
        ],
        output: "Array of {dataset, column, data_type} matches.".to_string(),
        role: AgentRole::SchemaExplorer,
    }
}

// ---------------------------------------------------------------------------
// Query execution
// ---------------------------------------------------------------------------

fn def_dataset_row_count() -> ToolDescriptor {
    ToolDescriptor {
        name: "dataset_row_count".to_string(),
        description: "Count the rows in the current version of a dataset.".to_string(),
        parameters: vec![ParamSpec::required(
            "dataset",
            ParamType::String,
            "Dataset name to count rows for.",
        )],
        output: "Object with the dataset name and its row count.".to_string(),
        role: AgentRole::QueryBuilder,
    }
}

fn def_run_query() -> ToolDescriptor {
    ToolDescriptor {
        name: "run_query".to_string(),
        description: "Execute a structured query against one or more datasets and return \
                      the result rows. Supports projections, filters, and joins over \
                      semantic mappings."
            .to_string(),
        parameters: vec![
            ParamSpec::required("query", ParamType::String, "Query text to execute."),
            ParamSpec::optional(
                "datasets",
                ParamType::Array,
                "Dataset names the query ranges over.",
            ),
            ParamSpec::optional("limit", ParamType::Integer, "Maximum rows to return."),
        ],
        output: "Object with column headers and result rows.".to_string(),
        role: AgentRole::QueryBuilder,
    }
}

// ---------------------------------------------------------------------------
// Analytics and semantics
// ---------------------------------------------------------------------------

fn def_column_statistics() -> ToolDescriptor {
    ToolDescriptor {
        name: "column_statistics".to_string(),
        description: "Compute descriptive statistics (count, mean, min, max, distinct \
                      values) for a numeric or categorical column of a dataset."
            .to_string(),
        parameters: vec![
            ParamSpec::required("dataset", ParamType::String, "Dataset containing the column."),
            ParamSpec::required("column", ParamType::String, "Column to compute statistics for."),
        ],
        output: "Object of statistic name to value.".to_string(),
        role: AgentRole::Analytics,
    }
}

fn def_semantic_label_columns() -> ToolDescriptor {
    ToolDescriptor {
        name: "semantic_label_columns".to_string(),
        description: "Assign ontology labels to the columns of a dataset using the given \
                      ontology (e.g. DBpedia). Returns the proposed labeling."
            .to_string(),
        parameters: vec![
            ParamSpec::required("dataset", ParamType::String, "Dataset to label."),
            ParamSpec::required("ontology", ParamType::String, "Ontology to draw labels from."),
        ],
        output: "Array of {column, label, confidence} assignments.".to_string(),
        role: AgentRole::Analytics,
    }
}

fn def_create_mapping() -> ToolDescriptor {
    ToolDescriptor {
        name: "create_mapping".to_string(),
        description: "Convert a semantic labeling into a queryable mapping so labeled \
                      datasets can be joined through their ontology concepts."
            .to_string(),
        parameters: vec![ParamSpec::required(
            "datasets",
            ParamType::Array,
            "Labeled dataset names to include in the mapping.",
        )],
        output: "Object describing the created mapping and its id.".to_string(),
        role: AgentRole::Analytics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_builds() {
        let registry = default_registry().unwrap_or_else(|_| unreachable!());
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_every_role_has_tools() {
        let registry = default_registry().unwrap_or_else(|_| unreachable!());
        for role in AgentRole::ALL {
            assert!(
                !registry.list_by_role(role).is_empty(),
                "role {role} has no tools"
            );
        }
    }

    #[test]
    fn test_catalog_descriptors_well_formed() {
        for descriptor in catalog() {
            assert!(!descriptor.name.is_empty());
            assert!(!descriptor.description.is_empty());
            assert!(!descriptor.output.is_empty());
            for param in &descriptor.parameters {
                assert!(!param.name.is_empty());
                assert!(!param.description.is_empty());
            }
        }
    }

    #[test]
    fn test_find_columns_owned_by_schema_role() {
        let registry = default_registry().unwrap_or_else(|_| unreachable!());
        let tool = registry
            .lookup("find_columns")
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(tool.role, AgentRole::SchemaExplorer);
    }
}
