//! Filter construction for retrieval queries.

use super::types::{FieldCondition, Filter, MatchCondition, SearchFilterArgs};

/// Compose a Qdrant filter from optional search arguments.
pub fn build_search_filter(args: &SearchFilterArgs) -> Option<Filter> {
    let mut must = Vec::new();

    if let Some(title) = args.title.as_deref().and_then(non_empty) {
        must.push(FieldCondition {
            key: "title".into(),
            condition: MatchCondition::Value {
                value: title.to_string(),
            },
        });
    }

    let tags: Vec<String> = args
        .tags
        .iter()
        .filter_map(|tag| non_empty(tag).map(str::to_lowercase))
        .collect();
    if !tags.is_empty() {
        must.push(FieldCondition {
            key: "tags".into(),
            condition: MatchCondition::Any { any: tags },
        });
    }

    if must.is_empty() {
        None
    } else {
        Some(Filter { must })
    }
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
