use std::fmt;

use super::{Document, DocumentError};

/// A document selector in `[?field="value"]...` form.
///
/// Two fields are understood: `_type` and `identifier`. A query without
/// clauses matches every document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Required `_type`, if any.
    pub document_type: Option<String>,
    /// Required `identifier`, if any.
    pub identifier: Option<String>,
}

impl Query {
    /// Matches every document of `document_type`.
    pub fn of_type(document_type: impl Into<String>) -> Self {
        Self {
            document_type: Some(document_type.into()),
            identifier: None,
        }
    }

    /// Narrows the query to one identifier.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Whether `document` satisfies every clause.
    pub fn matches(&self, document: &Document) -> bool {
        self.document_type
            .as_ref()
            .is_none_or(|wanted| *wanted == document.document_type)
            && self
                .identifier
                .as_ref()
                .is_none_or(|wanted| *wanted == document.identifier)
    }

    /// Parses the textual query form.
    ///
    /// # Errors
    /// Returns `DocumentError::Query` for malformed clauses, unknown fields
    /// or repeated fields.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let invalid = |reason: &str| DocumentError::Query {
            query: text.to_string(),
            reason: reason.to_string(),
        };

        let mut query = Query::default();
        let mut rest = text.trim();

        while !rest.is_empty() {
            let clause = rest
                .strip_prefix("[?")
                .ok_or_else(|| invalid("expected '[?'"))?;
            let (field, clause) = clause
                .split_once("=\"")
                .ok_or_else(|| invalid("expected '=\"'"))?;
            let (value, clause) = clause
                .split_once('"')
                .ok_or_else(|| invalid("unterminated value"))?;
            rest = clause
                .strip_prefix(']')
                .ok_or_else(|| invalid("expected ']'"))?;

            let slot = match field.trim() {
                "_type" => &mut query.document_type,
                "identifier" => &mut query.identifier,
                _ => return Err(invalid("unknown field")),
            };
            if slot.is_some() {
                return Err(invalid("repeated field"));
            }
            *slot = Some(value.to_string());
        }

        Ok(query)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(document_type) = &self.document_type {
            write!(f, "[?_type=\"{document_type}\"]")?;
        }
        if let Some(identifier) = &self.identifier {
            write!(f, "[?identifier=\"{identifier}\"]")?;
        }
        Ok(())
    }
}
