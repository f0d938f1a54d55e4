//! `(name)` placeholder substitution against account metadata.

use std::collections::BTreeMap;

use super::AccountError;

/// Replace every `(name)` in `template` with `metadata[name]`.
///
/// Unset or empty variables are errors, as are unmatched parentheses.
///
/// ```
/// use std::collections::BTreeMap;
/// use keyserver::account::substitute_vars;
///
/// let metadata = BTreeMap::from([("x".to_string(), "world".to_string())]);
/// assert_eq!(substitute_vars("hello (x)", &metadata).unwrap(), "hello world");
/// assert!(substitute_vars("hello (missing)", &BTreeMap::new()).is_err());
/// ```
pub fn substitute_vars(
    template: &str,
    metadata: &BTreeMap<String, String>,
) -> Result<String, AccountError> {
    let mut output = String::with_capacity(template.len());
    let mut variable: Option<String> = None;

    for c in template.chars() {
        match (c, variable.as_mut()) {
            ('(', Some(_)) => {
                return Err(AccountError::UnbalancedParenthesis {
                    template: template.to_string(),
                });
            }
            ('(', None) => variable = Some(String::new()),
            (')', None) => {
                return Err(AccountError::ExtraneousParenthesis {
                    template: template.to_string(),
                });
            }
            (')', Some(name)) => {
                match metadata.get(name.as_str()) {
                    Some(value) if !value.is_empty() => output.push_str(value),
                    _ => {
                        return Err(AccountError::UnsetVariable {
                            name: name.clone(),
                            template: template.to_string(),
                        });
                    }
                }
                variable = None;
            }
            (c, Some(name)) => name.push(c),
            (c, None) => output.push(c),
        }
    }

    if variable.is_some() {
        return Err(AccountError::UnbalancedParenthesis {
            template: template.to_string(),
        });
    }
    Ok(output)
}
