//! Base-32 geohash encoding.

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Encode a point as a geohash of `precision` characters.
///
/// Returns `None` for coordinates outside `[-90, 90] x [-180, 180]` or that
/// are not finite.
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Option<String> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }

    let mut lat = (-90.0_f64, 90.0_f64);
    let mut lon = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0;
    let mut idx = 0usize;

    while hash.len() < precision {
        let (range, v) = if even {
            (&mut lon, longitude)
        } else {
            (&mut lat, latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        idx <<= 1;
        if v >= mid {
            idx |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(char::from(BASE32[idx]));
            bits = 0;
            idx = 0;
        }
    }
    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_points() {
        assert_eq!(encode(42.6, -5.6, 5).as_deref(), Some("ezs42"));
        assert_eq!(
            encode(57.64911, 10.40744, 11).as_deref(),
            Some("u4pruydqqvj")
        );
    }

    #[test]
    fn precision_controls_length_and_prefixes_agree() {
        let long = encode(-34.611778, -58.417309, 9).expect("valid point");
        let short = encode(-34.611778, -58.417309, 7).expect("valid point");

        assert_eq!(short.len(), 7);
        assert!(long.starts_with(&short));
    }

    #[test]
    fn out_of_range_points_have_no_hash() {
        assert_eq!(encode(91.0, 0.0, 7), None);
        assert_eq!(encode(0.0, f64::NAN, 7), None);
    }
}
