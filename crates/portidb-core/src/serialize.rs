//! Wire helpers shared by keys and values.

///
/// number
///
/// JSON has no encoding for NaN or the infinities; they travel as the
/// strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
///

pub(crate) mod number {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(crate) fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if n.is_nan() {
            serializer.serialize_str("NaN")
        } else if n.is_infinite() {
            serializer.serialize_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            serializer.serialize_f64(*n)
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid number '{other}'"))),
            },
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Wrapper(#[serde(with = "super::number")] f64);

    #[test]
    fn non_finite_numbers_survive_json() {
        for n in [f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            let json = serde_json::to_string(&Wrapper(n)).unwrap();
            assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), Wrapper(n));
        }

        let json = serde_json::to_string(&Wrapper(f64::NAN)).unwrap();
        assert_eq!(json, "\"NaN\"");
        assert!(serde_json::from_str::<Wrapper>(&json).unwrap().0.is_nan());
    }
}
