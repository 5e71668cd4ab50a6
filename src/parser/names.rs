/// Return the identifier without surrounding double quotes.
pub fn unquote_identifier(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

/// Normalize an identifier for case-insensitive matching.
///
/// Trims whitespace, removes surrounding double quotes on a single identifier,
/// and lowercases the result.
pub fn normalize_identifier(ident: &str) -> String {
    unquote_identifier(ident.trim()).to_ascii_lowercase()
}

/// Fold a column identifier the way `PostgreSQL` does: quoted names keep
/// their spelling, unquoted names are lowercased.
pub fn fold_identifier(ident: &str) -> String {
    let trimmed = ident.trim();
    let unquoted = unquote_identifier(trimmed);
    if unquoted.len() == trimmed.len() {
        trimmed.to_ascii_lowercase()
    } else {
        unquoted.to_string()
    }
}

/// Split a potentially schema-qualified name into `(schema, relation)`.
///
/// Handles dots inside quoted identifiers, e.g. `"my.schema"."table.name"`.
pub fn split_schema_and_relation(name: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut parts: Vec<&str> = Vec::new();

    for (idx, ch) in name.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                parts.push(name[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(name[start..].trim());

    if parts.len() < 2 {
        return None;
    }

    let schema = unquote_identifier(parts[parts.len() - 2]).to_string();
    let relation = unquote_identifier(parts[parts.len() - 1]).to_string();
    Some((schema, relation))
}

/// Normalize an object name to its terminal relation/function identifier.
///
/// Examples:
/// - `"public.docs"` -> `"docs"`
/// - `"\"auth\".\"uid\""` -> `"uid"`
/// - `"CURRENT_USER"` -> `"current_user"`
pub fn normalize_relation_name(name: &str) -> String {
    if let Some((_, relation)) = split_schema_and_relation(name.trim()) {
        return normalize_identifier(&relation);
    }
    normalize_identifier(name)
}

/// Normalize a session variable name (`app.user_id`, `request.jwt.claims`).
///
/// Session settings are case-insensitive, so only case and surrounding
/// whitespace are folded; dots are kept.
pub fn normalize_session_var(name: &str) -> String {
    unquote_identifier(name.trim()).trim().to_ascii_lowercase()
}

fn name_tokens(name: &str) -> Vec<String> {
    normalize_identifier(name)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when the name looks like a tenant-scoping column
/// (`tenant_id`, `org_id`, `organization_id`, `account_id`, `workspace_id`).
pub fn is_tenant_column_name(name: &str) -> bool {
    const TENANT_TOKENS: &[&str] = &[
        "tenant",
        "tenantid",
        "org",
        "orgid",
        "organization",
        "organisation",
        "account",
        "workspace",
        "company",
    ];
    name_tokens(name)
        .iter()
        .any(|t| TENANT_TOKENS.contains(&t.as_str()))
}

/// True when the name looks like a user/owner column.
pub fn is_user_related_column_name(name: &str) -> bool {
    let lower = normalize_identifier(name);
    lower.contains("user_id")
        || lower.contains("owner")
        || lower.contains("created_by")
        || lower == "author_id"
        || lower == "uid"
}

/// True when the column identifies an owner or tenant, i.e. a predicate on it
/// scopes rows to a principal.
pub fn is_identity_column_name(name: &str) -> bool {
    is_user_related_column_name(name) || is_tenant_column_name(name)
}
