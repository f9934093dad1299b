use crate::Result;
use crate::conn::Connection;
use crate::diff::{Delta, function_delta};
use crate::error::Error;
use crate::ident::ObjectName;
use crate::introspect::Introspector;
use crate::types::TypeRegistry;
use tokio_util::sync::CancellationToken;
use trellis_sql::{CommandBuilder, SqlFragment};

/// A stored function: an identifier plus the raw body text.
///
/// The identifier is always derivable from the body; construction fails if
/// no recognizable `CREATE FUNCTION` signature is present. Functions built
/// by the introspector additionally remember the catalog's identity argument
/// signature, which changes the drop-statement form.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    identifier: ObjectName,
    body: String,
    catalog_arguments: Option<String>,
}

impl Function {
    /// Build a function from its `CREATE [OR REPLACE] FUNCTION` source.
    pub fn from_sql(body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        let identifier = Self::parse_identifier(&body)?;
        Ok(Self { identifier, body, catalog_arguments: None })
    }

    /// A function materialized from the catalog, with the identity argument
    /// signature as reported (`entity character varying`).
    pub(crate) fn introspected(
        identifier: ObjectName,
        body: String,
        arguments: String,
    ) -> Self {
        Self { identifier, body, catalog_arguments: Some(arguments) }
    }

    /// Extract the schema-qualified name from a function body.
    ///
    /// Fails with [`Error::MalformedDefinition`] when the body carries no
    /// parseable `CREATE [OR REPLACE] FUNCTION <name>(` signature.
    pub fn parse_identifier(body: &str) -> Result<ObjectName> {
        let lower = body.to_ascii_lowercase();
        let function_pos = find_word(&lower, "function").ok_or_else(|| {
            Error::MalformedDefinition(
                "no CREATE FUNCTION signature found in function body".into(),
            )
        })?;
        if find_word(&lower[..function_pos], "create").is_none() {
            return Err(Error::MalformedDefinition(
                "function body does not start with CREATE [OR REPLACE] FUNCTION".into(),
            ));
        }

        // ASCII lowering preserves offsets, so slice the original text
        let rest = &body[function_pos + "function".len()..];
        let paren = rest.find('(').ok_or_else(|| {
            Error::MalformedDefinition("function signature has no parameter list".into())
        })?;
        let raw_name = rest[..paren].trim();
        if raw_name.is_empty() || raw_name.contains(char::is_whitespace) {
            return Err(Error::MalformedDefinition(format!(
                "unparseable function name: {raw_name:?}"
            )));
        }
        ObjectName::parse(raw_name)
    }

    pub fn identifier(&self) -> &ObjectName {
        &self.identifier
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The parameter types as declared in the body's signature, in order,
    /// with parameter names, modes and defaults stripped.
    pub fn declared_argument_types(&self) -> Vec<String> {
        let Some(list) = parameter_list(&self.body) else {
            return Vec::new();
        };
        split_top_level(&list)
            .into_iter()
            .filter_map(|param| parameter_type(&param))
            .collect()
    }

    /// The statement(s) that remove this function.
    ///
    /// Drop-function signatures must match catalog-reported argument types
    /// exactly, so a function read back from the database uses the catalog's
    /// identity signature (with names, canonical spellings) in a defensive
    /// `IF EXISTS` form, while one built from source uses the declared
    /// spellings as-is.
    pub fn drop_statements(&self) -> Vec<String> {
        match &self.catalog_arguments {
            Some(arguments) => vec![format!(
                "DROP FUNCTION IF EXISTS {}({});",
                self.identifier, arguments
            )],
            None => vec![format!(
                "drop function {}({});",
                self.identifier,
                self.declared_argument_types().join(", ")
            )],
        }
    }

    /// Fetch the existing instance of this function, or `None` if absent.
    pub async fn fetch_existing<C: Connection>(
        &self,
        conn: &C,
        registry: &TypeRegistry,
        cancel: &CancellationToken,
    ) -> Result<Option<Function>> {
        Introspector::new(registry)
            .fetch_function(conn, &self.identifier, cancel)
            .await
    }

    /// Introspect and classify in one call.
    pub async fn fetch_delta<C: Connection>(
        &self,
        conn: &C,
        registry: &TypeRegistry,
        cancel: &CancellationToken,
    ) -> Result<Delta> {
        let existing = self.fetch_existing(conn, registry, cancel).await?;
        Ok(function_delta(registry, self, existing.as_ref()))
    }
}

impl SqlFragment for Function {
    /// A function's creation DDL is its own body text.
    fn apply(&self, builder: &mut CommandBuilder) {
        builder.push(self.body.trim());
    }
}

/// Find a keyword as a whole word (identifier-boundary delimited).
fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(word) {
        let pos = from + rel;
        let before_ok = pos == 0 || !is_ident_byte(bytes[pos - 1]);
        let end = pos + word.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(pos);
        }
        from = end;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// The text of the signature's parameter list, parens excluded.
fn parameter_list(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let function_pos = find_word(&lower, "function")?;
    let rest = &body[function_pos + "function".len()..];
    let open = rest.find('(')?;
    let mut depth = 0usize;
    for (offset, ch) in rest[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(rest[open + 1..open + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a parameter list on commas, ignoring commas nested in parentheses
/// (as in `numeric(10, 2)`).
fn split_top_level(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// Extract the type from a single declared parameter.
///
/// Strips argument modes and `DEFAULT`/`=` clauses; a lone token is an
/// unnamed parameter, otherwise the first token is the name and the rest is
/// the (possibly multi-word) type.
fn parameter_type(param: &str) -> Option<String> {
    let head = match find_word(&param.to_ascii_lowercase(), "default") {
        Some(pos) => &param[..pos],
        None => param,
    };
    let head = head.split('=').next().unwrap_or(head);

    let tokens: Vec<&str> = head
        .split_whitespace()
        .filter(|t| {
            !matches!(
                t.to_ascii_lowercase().as_str(),
                "in" | "out" | "inout" | "variadic"
            )
        })
        .collect();
    match tokens.len() {
        0 => None,
        1 => Some(tokens[0].to_string()),
        _ => Some(tokens[1..].join(" ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEXT_HI_BODY: &str = r#"
CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar) RETURNS integer AS
$$
DECLARE
    current_value bigint;
    next_value bigint;
BEGIN
    select hi_value into current_value from functions.mt_hilo where entity_name = entity;
    IF current_value is null THEN
        insert into functions.mt_hilo (entity_name, hi_value) values (entity, 0);
        next_value := 0;
    ELSE
        next_value := current_value + 1;
        update functions.mt_hilo set hi_value = next_value where entity_name = entity and hi_value = current_value;

        IF NOT FOUND THEN
            next_value := -1;
        END IF;
    END IF;

    return next_value;
END

$$ LANGUAGE plpgsql;
"#;

    #[test]
    fn reads_the_identifier_from_a_function_body() {
        let identifier = Function::parse_identifier(NEXT_HI_BODY).unwrap();
        assert_eq!(identifier, ObjectName::new("functions", "mt_get_next_hi"));
    }

    #[test]
    fn derives_the_drop_statement_from_the_body() {
        let function = Function::from_sql(NEXT_HI_BODY).unwrap();
        assert_eq!(
            function.drop_statements(),
            vec!["drop function functions.mt_get_next_hi(varchar);".to_string()]
        );
    }

    #[test]
    fn introspected_functions_drop_with_the_catalog_signature() {
        let function = Function::introspected(
            ObjectName::new("functions", "mt_get_next_hi"),
            NEXT_HI_BODY.to_string(),
            "entity character varying".to_string(),
        );
        assert_eq!(
            function.drop_statements(),
            vec![
                "DROP FUNCTION IF EXISTS functions.mt_get_next_hi(entity character varying);"
                    .to_string()
            ]
        );
    }

    #[test]
    fn construction_fails_without_a_signature() {
        assert!(matches!(
            Function::from_sql("select 1;"),
            Err(Error::MalformedDefinition(_))
        ));
        assert!(matches!(
            Function::from_sql("FUNCTION nope()"),
            Err(Error::MalformedDefinition(_))
        ));
    }

    #[test]
    fn parses_multi_word_and_defaulted_parameters() {
        let function = Function::from_sql(
            "CREATE FUNCTION api.fn(a character varying, b timestamp with time zone, \
             c numeric(10, 2) DEFAULT 0, variadic rest integer) RETURNS void AS $$ $$ LANGUAGE sql;",
        )
        .unwrap();
        assert_eq!(
            function.declared_argument_types(),
            vec![
                "character varying".to_string(),
                "timestamp with time zone".to_string(),
                "numeric(10, 2)".to_string(),
                "integer".to_string(),
            ]
        );
    }

    #[test]
    fn zero_argument_functions_drop_with_empty_parens() {
        let function =
            Function::from_sql("create function public.touch() returns void as $$ $$ language sql;")
                .unwrap();
        assert_eq!(
            function.drop_statements(),
            vec!["drop function public.touch();".to_string()]
        );
    }

    #[test]
    fn quoted_names_parse() {
        let function = Function::from_sql(
            "CREATE FUNCTION \"Api\".\"DoThing\"(x integer) RETURNS void AS $$ $$ LANGUAGE sql;",
        )
        .unwrap();
        assert_eq!(function.identifier(), &ObjectName::new("Api", "DoThing"));
    }
}
