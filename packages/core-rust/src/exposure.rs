//! Allow-listed serialization of outbound domain objects.
//!
//! Types opt into the wire by naming the fields clients may see. Anything not
//! listed (secrets, internal bookkeeping) is dropped after serialization.

use serde::Serialize;
use serde_json::Value;

/// A domain object with an explicit list of client-visible fields.
///
/// Field names refer to the serialized (post-rename) keys.
pub trait Exposed: Serialize {
    const PUBLIC_FIELDS: &'static [&'static str];
}

/// Serializes a value keeping only its public fields.
///
/// Non-object representations (e.g. newtypes serialized as scalars) are
/// returned unchanged.
///
/// # Errors
///
/// Returns the underlying serializer error.
pub fn expose<T: Exposed>(value: &T) -> Result<Value, serde_json::Error> {
    let mut serialized = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut serialized {
        map.retain(|key, _| T::PUBLIC_FIELDS.contains(&key.as_str()));
    }
    Ok(serialized)
}

/// Serializes a slice of values, applying [`expose`] to each element.
///
/// # Errors
///
/// Returns the first serializer error.
pub fn expose_all<T: Exposed>(values: &[T]) -> Result<Value, serde_json::Error> {
    values
        .iter()
        .map(expose)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Account {
        id: u32,
        display_name: String,
        password_hash: String,
        api_token: Option<String>,
    }

    impl Exposed for Account {
        const PUBLIC_FIELDS: &'static [&'static str] = &["id", "displayName"];
    }

    fn account(id: u32) -> Account {
        Account {
            id,
            display_name: format!("user-{id}"),
            password_hash: "$argon2id$...".to_string(),
            api_token: Some("tok".to_string()),
        }
    }

    #[test]
    fn only_public_fields_are_kept() {
        let value = expose(&account(1)).unwrap();
        assert_eq!(value, json!({ "id": 1, "displayName": "user-1" }));
    }

    #[test]
    fn expose_all_filters_each_element() {
        let value = expose_all(&[account(1), account(2)]).unwrap();
        assert_eq!(
            value,
            json!([
                { "id": 1, "displayName": "user-1" },
                { "id": 2, "displayName": "user-2" },
            ])
        );
    }

    #[test]
    fn scalar_representation_passes_through() {
        #[derive(Serialize)]
        struct Token(String);
        impl Exposed for Token {
            const PUBLIC_FIELDS: &'static [&'static str] = &[];
        }
        assert_eq!(expose(&Token("t".to_string())).unwrap(), json!("t"));
    }
}
