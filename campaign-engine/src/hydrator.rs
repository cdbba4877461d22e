//! Prompt template hydration
//!
//! Substitutes `{{ variable }}` placeholders in a campaign prompt with values
//! from a single row. Variable names are the column keys (falling back to the
//! raw field id for fields without a column definition) and are matched
//! case-insensitively. Unknown placeholders are left in place.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use shared_types::CampaignColumn;
use std::collections::{BTreeMap, HashMap};

/// `{{ identifier }}` where the identifier may hold letters (any script,
/// extended Latin included), digits, underscores and interior whitespace.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([\p{L}\p{N}_\s]+)\}\}").expect("valid regex"));

/// Map row data to template variables keyed by column key.
pub fn build_variables(
    data: &HashMap<String, String>,
    columns: &[CampaignColumn],
) -> BTreeMap<String, String> {
    let keys_by_id: HashMap<&str, &str> = columns
        .iter()
        .filter(|column| !column.key.is_empty())
        .map(|column| (column.id.as_str(), column.key.as_str()))
        .collect();

    data.iter()
        .map(|(field_id, value)| {
            let key = keys_by_id
                .get(field_id.as_str())
                .copied()
                .unwrap_or(field_id.as_str());
            (key.to_string(), value.clone())
        })
        .collect()
}

/// Hydrate `template` with one row's data.
pub fn hydrate(
    template: &str,
    data: &HashMap<String, String>,
    columns: &[CampaignColumn],
) -> String {
    hydrate_with(template, &build_variables(data, columns))
}

/// Hydrate `template` against an already-built variable map.
pub fn hydrate_with(template: &str, variables: &BTreeMap<String, String>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let mut lookup: HashMap<String, &str> = HashMap::with_capacity(variables.len());
    for (key, value) in variables {
        lookup.entry(key.to_lowercase()).or_insert(value.as_str());
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps[1].trim().to_lowercase();
            match lookup.get(name.as_str()) {
                Some(value) if !name.is_empty() => (*value).to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn column(id: &str, key: &str) -> CampaignColumn {
        CampaignColumn {
            id: id.to_string(),
            key: key.to_string(),
            label: key.to_string(),
        }
    }

    #[test]
    fn test_hydrate_resolves_column_key_case_insensitively() {
        let out = hydrate(
            "Hola {{Nombre}}",
            &data(&[("name", "Ana")]),
            &[column("name", "nombre")],
        );
        assert_eq!(out, "Hola Ana");
    }

    #[test]
    fn test_hydrate_leaves_unknown_placeholder() {
        let out = hydrate("Hi {{unknown}}", &HashMap::new(), &[]);
        assert_eq!(out, "Hi {{unknown}}");
    }

    #[test]
    fn test_hydrate_falls_back_to_field_id() {
        let out = hydrate("Cita: {{ col_fecha }}", &data(&[("col_fecha", "lunes")]), &[]);
        assert_eq!(out, "Cita: lunes");
    }

    #[test]
    fn test_hydrate_trims_and_accepts_extended_latin() {
        let out = hydrate(
            "{{  Teléfono Móvil }} / {{AÑO}}",
            &data(&[("c1", "600111222"), ("c2", "2026")]),
            &[column("c1", "teléfono móvil"), column("c2", "año")],
        );
        assert_eq!(out, "600111222 / 2026");
    }

    #[test]
    fn test_hydrate_replaces_every_occurrence_verbatim() {
        let out = hydrate(
            "{{n}} {{N}} {{n}}",
            &data(&[("n", "$1 {{x}}")]),
            &[],
        );
        assert_eq!(out, "$1 {{x}} $1 {{x}} $1 {{x}}");
    }

    #[test]
    fn test_hydrate_tolerates_malformed_braces() {
        let vars = data(&[("name", "Ana")]);
        assert_eq!(hydrate("{{name", &vars, &[]), "{{name");
        assert_eq!(hydrate("name}}", &vars, &[]), "name}}");
        assert_eq!(hydrate("{{}}", &vars, &[]), "{{}}");
        assert_eq!(hydrate("{{   }}", &vars, &[]), "{{   }}");
        assert_eq!(hydrate("{{na-me}}", &vars, &[]), "{{na-me}}");
        assert_eq!(hydrate("{{{name}}}", &vars, &[]), "{Ana}");
    }

    #[test]
    fn test_hydrate_is_identity_without_placeholders() {
        let text = "Buenos días, le llamamos de la clínica.";
        let vars = data(&[("name", "Ana")]);
        assert_eq!(hydrate(text, &vars, &[]), text);
        assert_eq!(hydrate(&hydrate(text, &vars, &[]), &vars, &[]), text);
    }

    #[test]
    fn test_build_variables_uses_column_keys() {
        let vars = build_variables(
            &data(&[("c_name", "Ana"), ("c_extra", "x")]),
            &[column("c_name", "nombre"), column("c_unused", "otro")],
        );
        assert_eq!(vars.get("nombre").map(String::as_str), Some("Ana"));
        assert_eq!(vars.get("c_extra").map(String::as_str), Some("x"));
        assert!(!vars.contains_key("otro"));
        assert!(!vars.contains_key("c_name"));
    }
}
