//! Text component conversions used when a chat format changes between versions.

use crossgrade_nbt::NbtValue;
use crossgrade_types::TextComponent;
use serde_json::Value as Json;

fn color_name(code: char) -> Option<&'static str> {
    Some(match code {
        '0' => "black",
        '1' => "dark_blue",
        '2' => "dark_green",
        '3' => "dark_aqua",
        '4' => "dark_red",
        '5' => "dark_purple",
        '6' => "gold",
        '7' => "gray",
        '8' => "dark_gray",
        '9' => "blue",
        'a' => "green",
        'b' => "aqua",
        'c' => "red",
        'd' => "light_purple",
        'e' => "yellow",
        'f' => "white",
        _ => return None,
    })
}

/// Parse `§`-formatted legacy text into a component tree.
pub fn legacy_to_component(legacy: &str) -> TextComponent {
    let mut parts = Vec::new();
    let mut style = TextComponent::default();
    let mut current = String::new();
    let mut chars = legacy.chars();

    while let Some(c) = chars.next() {
        if c != '\u{a7}' {
            current.push(c);
            continue;
        }
        let Some(code) = chars.next().map(|c| c.to_ascii_lowercase()) else {
            break;
        };
        if !current.is_empty() {
            parts.push(TextComponent {
                text: std::mem::take(&mut current),
                ..style.clone()
            });
        }
        if let Some(color) = color_name(code) {
            style = TextComponent {
                color: Some(color.to_string()),
                ..TextComponent::default()
            };
            continue;
        }
        match code {
            'k' => style.obfuscated = Some(true),
            'l' => style.bold = Some(true),
            'm' => style.strikethrough = Some(true),
            'n' => style.underlined = Some(true),
            'o' => style.italic = Some(true),
            'r' => style = TextComponent::default(),
            _ => {}
        }
    }
    if !current.is_empty() {
        parts.push(TextComponent {
            text: current,
            ..style
        });
    }

    match parts.len() {
        0 => TextComponent::plain(""),
        1 if parts[0] == TextComponent::plain(parts[0].text.clone()) => parts.remove(0),
        _ => TextComponent {
            extra: parts,
            ..TextComponent::default()
        },
    }
}

/// Legacy text straight to a JSON component string.
pub fn legacy_to_json(legacy: &str) -> String {
    legacy_to_component(legacy).to_json()
}

/// Convert a JSON text component into its NBT form (1.20.3+).
pub fn json_to_tag(json: &Json) -> Option<NbtValue> {
    Some(match json {
        Json::Null => return None,
        Json::Bool(b) => NbtValue::Byte(*b as i8),
        Json::Number(n) => match n.as_i64() {
            Some(v) => match i32::try_from(v) {
                Ok(v) => NbtValue::Int(v),
                Err(_) => NbtValue::Long(v),
            },
            None => NbtValue::Double(n.as_f64()?),
        },
        Json::String(s) => NbtValue::String(s.clone()),
        Json::Array(items) => {
            let items: Vec<NbtValue> = items.iter().filter_map(json_to_tag).collect();
            let homogeneous = items.windows(2).all(|w| w[0].tag_id() == w[1].tag_id());
            if homogeneous {
                NbtValue::list(items)
            } else {
                // Mixed lists are not representable; wrap each entry in a compound.
                NbtValue::list(
                    items
                        .into_iter()
                        .map(|item| match item {
                            NbtValue::Compound(_) => item,
                            other => NbtValue::Compound(vec![(String::new(), other)]),
                        })
                        .collect(),
                )
            }
        }
        Json::Object(map) => NbtValue::Compound(
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), json_to_tag(v)?)))
                .collect(),
        ),
    })
}

/// Parse a JSON component string and convert it to NBT. Unparseable input is
/// treated as plain text.
pub fn json_str_to_tag(json: &str) -> NbtValue {
    match serde_json::from_str::<Json>(json) {
        Ok(value) => json_to_tag(&value).unwrap_or_else(|| NbtValue::String(String::new())),
        Err(_) => NbtValue::String(json.to_string()),
    }
}
