//! Helpers shared by unit tests.

pub mod serde {
    use std::fmt::Debug;

    use ::serde::de::DeserializeOwned;
    use ::serde::Serialize;

    /// Encode to a JSON string, decode, and compare structurally.
    pub fn assert_round_trip_eq<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + Debug,
    {
        let wire = serde_json::to_string(value).expect("value encodes");
        let decoded: T = serde_json::from_str(&wire).expect("value decodes");
        assert_eq!(&decoded, value, "wire form {wire} did not decode to the same value");
    }

    /// Check the JSON payload is stable across a decode/encode cycle. Useful for
    /// types without `PartialEq`.
    pub fn assert_round_trip_json<T>(value: &T)
    where
        T: Serialize + DeserializeOwned,
    {
        let first = serde_json::to_value(value).expect("value encodes");
        let decoded: T = serde_json::from_value(first.clone()).expect("value decodes");
        let second = serde_json::to_value(&decoded).expect("decoded value encodes");
        assert_eq!(second, first, "payload changed across a round-trip");
    }
}
