//! Boundary validation for loosely-typed query parameters.
//!
//! Every field is read as an arbitrary JSON value. Malformed fields are
//! downgraded to their defaults and reported as [`QueryWarning`]s; the request
//! as a whole is never rejected.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::model::{
    Operation, QuerySpec, QueryWarning, SortDirection, SortField, TransactionKind, WarningCode,
};
use crate::temporal::{PeriodFallback, TemporalResolver};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryParams {
    pub operation: Option<Value>,
    pub kind_filter: Option<Value>,
    pub categories: Option<Value>,
    pub description_terms: Option<Value>,
    pub range_start_text: Option<Value>,
    pub range_end_text: Option<Value>,
    pub sort_field: Option<Value>,
    pub sort_direction: Option<Value>,
    pub limit: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub spec: QuerySpec,
    pub warnings: Vec<QueryWarning>,
}

impl QueryParams {
    /// Reads parameters from an arbitrary JSON payload.
    ///
    /// `null` is treated as an empty mapping; any other non-object payload
    /// yields all defaults plus one warning.
    #[must_use]
    pub fn from_value(value: Value) -> (Self, Vec<QueryWarning>) {
        match value {
            Value::Null => (Self::default(), Vec::new()),
            Value::Object(_) => match serde_json::from_value(value) {
                Ok(params) => (params, Vec::new()),
                Err(err) => (
                    Self::default(),
                    vec![QueryWarning::new(
                        WarningCode::InvalidPayload,
                        format!("query parameters could not be read ({err}); using defaults"),
                    )],
                ),
            },
            other => (
                Self::default(),
                vec![QueryWarning::new(
                    WarningCode::InvalidPayload,
                    format!(
                        "query parameters must be an object, got {}; using defaults",
                        json_type_name(&other)
                    ),
                )],
            ),
        }
    }

    /// Resolves every field into a [`QuerySpec`] for `owner_id`.
    #[must_use]
    pub fn normalize<F: PeriodFallback>(
        &self,
        owner_id: &str,
        resolver: &TemporalResolver<F>,
        reference: OffsetDateTime,
    ) -> NormalizedQuery {
        let mut warnings = Vec::new();
        let mut spec = QuerySpec::for_owner(owner_id);

        spec.operation = normalize_operation(self.operation.as_ref(), &mut warnings);
        spec.kind_filter = normalize_kind(self.kind_filter.as_ref(), &mut warnings);
        spec.categories = normalize_terms(
            self.categories.as_ref(),
            "categories",
            WarningCode::InvalidCategories,
            &mut warnings,
        );
        spec.description_terms = normalize_terms(
            self.description_terms.as_ref(),
            "description_terms",
            WarningCode::InvalidDescriptionTerms,
            &mut warnings,
        );

        if let Some(text) = range_text(
            self.range_start_text.as_ref(),
            "range_start_text",
            WarningCode::UnparsableRangeStart,
            &mut warnings,
        ) {
            spec.range_start = resolver.resolve_range_start(text, reference);
            if spec.range_start.is_none() {
                warnings.push(QueryWarning::new(
                    WarningCode::UnparsableRangeStart,
                    format!("could not resolve range_start_text '{text}'; ignoring start bound"),
                ));
            }
        }

        if let Some(text) = range_text(
            self.range_end_text.as_ref(),
            "range_end_text",
            WarningCode::UnparsableRangeEnd,
            &mut warnings,
        ) {
            spec.range_end = resolver.resolve_range_end(text, reference);
            if spec.range_end.is_none() {
                warnings.push(QueryWarning::new(
                    WarningCode::UnparsableRangeEnd,
                    format!("could not resolve range_end_text '{text}'; ignoring end bound"),
                ));
            }
        }

        let (sort_field, sort_direction) = normalize_sort(
            self.sort_field.as_ref(),
            self.sort_direction.as_ref(),
            &mut warnings,
        );
        spec.sort_field = sort_field;
        spec.sort_direction = sort_direction;
        spec.limit = normalize_limit(self.limit.as_ref(), &mut warnings);

        for warning in &warnings {
            tracing::debug!(code = ?warning.code, %warning, "query parameter degraded to default");
        }

        NormalizedQuery { spec, warnings }
    }
}

fn normalize_operation(raw: Option<&Value>, warnings: &mut Vec<QueryWarning>) -> Operation {
    let Some(raw) = raw else {
        return Operation::default();
    };

    let parsed = raw
        .as_str()
        .map(|value| value.trim().to_lowercase())
        .and_then(|value| match value.as_str() {
            "sum" | "total" => Some(Operation::Sum),
            "count" => Some(Operation::Count),
            "average" | "avg" | "mean" => Some(Operation::Average),
            "list" => Some(Operation::List),
            _ => None,
        });

    parsed.unwrap_or_else(|| {
        warnings.push(QueryWarning::new(
            WarningCode::UnknownOperation,
            format!("unrecognized operation {raw}; defaulted to list"),
        ));
        Operation::List
    })
}

fn normalize_kind(raw: Option<&Value>, warnings: &mut Vec<QueryWarning>) -> Option<TransactionKind> {
    let raw = raw?;

    let parsed = raw
        .as_str()
        .map(|value| value.trim().to_lowercase())
        .and_then(|value| match value.as_str() {
            "inflow" | "income" => Some(TransactionKind::Inflow),
            "outflow" | "expense" => Some(TransactionKind::Outflow),
            _ => None,
        });

    if parsed.is_none() {
        warnings.push(QueryWarning::new(
            WarningCode::UnknownKind,
            format!("unrecognized kind_filter {raw}; matching both kinds"),
        ));
    }
    parsed
}

fn normalize_terms(
    raw: Option<&Value>,
    field: &str,
    code: WarningCode,
    warnings: &mut Vec<QueryWarning>,
) -> Option<Vec<String>> {
    let terms: Vec<String> = match raw? {
        Value::String(single) => vec![single.clone()],
        Value::Array(items) => {
            let mut terms = Vec::with_capacity(items.len());
            let mut skipped = 0_usize;
            for item in items {
                match item {
                    Value::String(term) => terms.push(term.clone()),
                    _ => skipped += 1,
                }
            }
            if skipped > 0 {
                warnings.push(QueryWarning::new(
                    code,
                    format!("{field} contained {skipped} non-text entries; they were ignored"),
                ));
            }
            terms
        }
        other => {
            warnings.push(QueryWarning::new(
                code,
                format!(
                    "{field} must be a list of strings, got {}; ignoring filter",
                    json_type_name(other)
                ),
            ));
            return None;
        }
    };

    let terms: Vec<String> = terms
        .into_iter()
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms)
    }
}

fn range_text<'a>(
    raw: Option<&'a Value>,
    field: &str,
    code: WarningCode,
    warnings: &mut Vec<QueryWarning>,
) -> Option<&'a str> {
    match raw? {
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.trim()),
        other => {
            warnings.push(QueryWarning::new(
                code,
                format!(
                    "{field} must be text, got {}; ignoring bound",
                    json_type_name(other)
                ),
            ));
            None
        }
    }
}

fn normalize_sort(
    field: Option<&Value>,
    direction: Option<&Value>,
    warnings: &mut Vec<QueryWarning>,
) -> (SortField, SortDirection) {
    let sort_field = match field {
        None => SortField::default(),
        Some(raw) => {
            let parsed = raw
                .as_str()
                .map(|value| value.trim().to_lowercase())
                .and_then(|value| match value.as_str() {
                    "timestamp" | "date" => Some(SortField::Timestamp),
                    "amount" => Some(SortField::Amount),
                    _ => None,
                });
            match parsed {
                Some(value) => value,
                None => {
                    warnings.push(QueryWarning::new(
                        WarningCode::UnknownSortField,
                        format!("unrecognized sort field {raw}, defaulted to timestamp descending"),
                    ));
                    return (SortField::Timestamp, SortDirection::Descending);
                }
            }
        }
    };

    let sort_direction = match direction {
        None => SortDirection::default(),
        Some(raw) => {
            let parsed = raw
                .as_str()
                .map(|value| value.trim().to_lowercase())
                .and_then(|value| match value.as_str() {
                    "asc" | "ascending" => Some(SortDirection::Ascending),
                    "desc" | "descending" => Some(SortDirection::Descending),
                    _ => None,
                });
            parsed.unwrap_or_else(|| {
                warnings.push(QueryWarning::new(
                    WarningCode::UnknownSortDirection,
                    format!("unrecognized sort direction {raw}, defaulted to descending"),
                ));
                SortDirection::Descending
            })
        }
    };

    (sort_field, sort_direction)
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn normalize_limit(raw: Option<&Value>, warnings: &mut Vec<QueryWarning>) -> Option<usize> {
    let raw = raw?;

    let parsed: Option<i64> = match raw {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.fract() == 0.0 && value.abs() < 9.0e15)
                .map(|value| value as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    let Some(value) = parsed else {
        warnings.push(QueryWarning::new(
            WarningCode::InvalidLimit,
            format!("non-numeric limit {raw}; ignoring limit"),
        ));
        return None;
    };

    match usize::try_from(value) {
        Ok(limit) if limit > 0 => Some(limit),
        _ => {
            warnings.push(QueryWarning::new(
                WarningCode::InvalidLimit,
                format!("limit must be positive, got {value}; ignoring limit"),
            ));
            None
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
