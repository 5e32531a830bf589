use crate::types::Identity;

const SPRITE_MARKER: &str = "sprite:";
const PHOTO_MARKER: &str = "photo:";
const SEPARATOR: char = '|';
const ESCAPED_PERCENT: &str = "%25";
const ESCAPED_SEPARATOR: &str = "%7C";

/// Packs a sprite choice and optional photo into the single string stored
/// remotely, e.g. `sprite:Alex|photo:https://...`. `%` and `|` inside the
/// sprite name are percent-escaped; the photo URL is stored verbatim.
pub fn encode(sprite_name: &str, photo_url: Option<&str>) -> String {
    let sprite_name = escape_sprite(sprite_name);
    match photo_url.filter(|url| !url.is_empty()) {
        Some(url) => format!("{SPRITE_MARKER}{sprite_name}{SEPARATOR}{PHOTO_MARKER}{url}"),
        None => format!("{SPRITE_MARKER}{sprite_name}"),
    }
}

/// Never fails: anything that is not a sprite-tagged string decodes to the
/// fallback sprite without a photo.
pub fn decode(packed: &str, fallback_sprite: &str) -> Identity {
    let fallback = || Identity {
        sprite_name: fallback_sprite.to_string(),
        photo_url: None,
    };
    let Some(rest) = packed.strip_prefix(SPRITE_MARKER) else {
        return fallback();
    };

    let (sprite, tail) = match rest.split_once(SEPARATOR) {
        Some((sprite, tail)) => (sprite, Some(tail)),
        None => (rest, None),
    };
    // URLs may themselves contain the separator, so the photo is everything
    // after its marker.
    let photo_url = tail
        .and_then(|tail| tail.strip_prefix(PHOTO_MARKER))
        .filter(|url| !url.is_empty())
        .map(str::to_string);

    Identity {
        sprite_name: if sprite.is_empty() {
            fallback_sprite.to_string()
        } else {
            unescape_sprite(sprite)
        },
        photo_url,
    }
}

fn escape_sprite(sprite_name: &str) -> String {
    sprite_name
        .replace('%', ESCAPED_PERCENT)
        .replace(SEPARATOR, ESCAPED_SEPARATOR)
}

// Unknown `%xx` sequences are kept as written.
fn unescape_sprite(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(index) = rest.find('%') {
        out.push_str(&rest[..index]);
        let candidate = &rest[index..];
        let code = candidate.get(..ESCAPED_PERCENT.len());
        if code.is_some_and(|code| code.eq_ignore_ascii_case(ESCAPED_PERCENT)) {
            out.push('%');
            rest = &candidate[ESCAPED_PERCENT.len()..];
        } else if code.is_some_and(|code| code.eq_ignore_ascii_case(ESCAPED_SEPARATOR)) {
            out.push(SEPARATOR);
            rest = &candidate[ESCAPED_SEPARATOR.len()..];
        } else {
            out.push('%');
            rest = &candidate[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FALLBACK_SPRITE, SPRITE_OPTIONS};

    #[test]
    fn round_trips_every_sprite_with_and_without_photo() {
        let photos = [
            None,
            Some("https://cdn.example.com/face_1.jpg"),
            Some("https://cdn.example.com/a|b.jpg?x=photo:1"),
        ];
        for sprite in SPRITE_OPTIONS.iter().chain(["Custom Sprite"].iter()) {
            for photo in photos {
                let decoded = decode(&encode(sprite, photo), FALLBACK_SPRITE);
                assert_eq!(decoded.sprite_name, *sprite);
                assert_eq!(decoded.photo_url.as_deref(), photo);
            }
        }
    }

    #[test]
    fn sprite_names_with_separator_or_percent_round_trip() {
        let sprites = ["a|b", "x|photo:https://evil", "100%", "50%7C", "%25|%"];
        for sprite in sprites {
            for photo in [None, Some("https://cdn.example.com/p.jpg")] {
                let packed = encode(sprite, photo);
                let separators = packed.matches(SEPARATOR).count();
                assert_eq!(separators, usize::from(photo.is_some()));
                let decoded = decode(&packed, FALLBACK_SPRITE);
                assert_eq!(decoded.sprite_name, sprite);
                assert_eq!(decoded.photo_url.as_deref(), photo);
            }
        }
    }

    #[test]
    fn stray_percent_in_stored_sprite_is_kept() {
        assert_eq!(decode("sprite:a%zz%", FALLBACK_SPRITE).sprite_name, "a%zz%");
        assert_eq!(decode("sprite:a%7cb", FALLBACK_SPRITE).sprite_name, "a|b");
    }

    #[test]
    fn encode_is_deterministic() {
        assert_eq!(encode("Alex", None), "sprite:Alex");
        assert_eq!(
            encode("Alex", Some("https://x/y.jpg")),
            "sprite:Alex|photo:https://x/y.jpg"
        );
        assert_eq!(encode("Alex", Some("")), "sprite:Alex");
        assert_eq!(encode("a|b", None), "sprite:a%7Cb");
    }

    #[test]
    fn garbage_degrades_to_fallback() {
        for raw in ["garbage", "", "https://old-style/photo.jpg", "photo:x|sprite:Alex"] {
            let decoded = decode(raw, FALLBACK_SPRITE);
            assert_eq!(decoded.sprite_name, FALLBACK_SPRITE);
            assert_eq!(decoded.photo_url, None);
        }
    }

    #[test]
    fn empty_segments_are_treated_as_absent() {
        let decoded = decode("sprite:Leah|photo:", FALLBACK_SPRITE);
        assert_eq!(decoded.sprite_name, "Leah");
        assert_eq!(decoded.photo_url, None);

        let decoded = decode("sprite:|photo:https://x", FALLBACK_SPRITE);
        assert_eq!(decoded.sprite_name, FALLBACK_SPRITE);
        assert_eq!(decoded.photo_url.as_deref(), Some("https://x"));

        let decoded = decode("sprite:Sam|junk", FALLBACK_SPRITE);
        assert_eq!(decoded.sprite_name, "Sam");
        assert_eq!(decoded.photo_url, None);
    }
}
