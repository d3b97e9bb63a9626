/// Numeric coercion at the write boundary.
///
/// The upstream feed is sparse: any field may be missing, `null`, a string
/// placeholder such as `"NULL"`, or a float that is not a number. Every value
/// headed for the store passes through one of these functions so that all of
/// those cases end up as `None` and nothing is ever stored as a sentinel.

use serde_json::Value;

use crate::model::WeatherFields;

/// A finite float, or absent.
pub fn number(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// An integer column value. Fractional input rounds to the nearest integer;
/// non-finite or out-of-range input is absent.
pub fn integer(value: f64) -> Option<i32> {
    let rounded = number(value)?.round();
    if rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
        return None;
    }
    Some(rounded as i32)
}

/// Coerces an arbitrary JSON value to a number.
///
/// Numbers pass through, numeric strings are parsed, everything else
/// (`null`, `"NULL"`, `""`, arrays, objects, booleans) is absent.
pub fn from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(number),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(number),
        _ => None,
    }
}

/// Same as [`from_json`] for integer columns.
pub fn int_from_json(value: &Value) -> Option<i32> {
    from_json(value).and_then(integer)
}

/// Re-applies coercion to a set of fields that may have been built by hand.
pub fn fields(raw: WeatherFields) -> WeatherFields {
    WeatherFields {
        temp: raw.temp.and_then(number),
        humidity: raw.humidity,
        clouds: raw.clouds,
        rain: raw.rain.and_then(number),
        wind: raw.wind.and_then(number),
        wind_dir: raw.wind_dir,
        gusts: raw.gusts.and_then(number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_rejects_nan_and_infinity() {
        assert_eq!(number(3.5), Some(3.5));
        assert_eq!(number(0.0), Some(0.0));
        assert_eq!(number(f64::NAN), None);
        assert_eq!(number(f64::INFINITY), None);
        assert_eq!(number(f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_integer_rounds_and_bounds() {
        assert_eq!(integer(81.0), Some(81));
        assert_eq!(integer(80.6), Some(81));
        assert_eq!(integer(-0.4), Some(0));
        assert_eq!(integer(f64::NAN), None);
        assert_eq!(integer(1e12), None);
    }

    #[test]
    fn test_from_json_never_yields_zero_for_garbage() {
        assert_eq!(from_json(&json!(12.5)), Some(12.5));
        assert_eq!(from_json(&json!(7)), Some(7.0));
        assert_eq!(from_json(&json!("4.25")), Some(4.25));
        assert_eq!(from_json(&json!("NULL")), None);
        assert_eq!(from_json(&json!("")), None);
        assert_eq!(from_json(&json!("nan")), None);
        assert_eq!(from_json(&Value::Null), None);
        assert_eq!(from_json(&json!({"v": 1})), None);
        assert_eq!(from_json(&json!(true)), None);
    }

    #[test]
    fn test_fields_strips_non_finite_floats() {
        let raw = WeatherFields {
            temp: Some(f64::NAN),
            humidity: Some(70),
            rain: Some(1.2),
            gusts: Some(f64::INFINITY),
            ..Default::default()
        };
        let clean = fields(raw);
        assert_eq!(clean.temp, None);
        assert_eq!(clean.humidity, Some(70));
        assert_eq!(clean.rain, Some(1.2));
        assert_eq!(clean.gusts, None);
    }
}
