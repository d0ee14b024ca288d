//! Launch files: a single description, or an array of `{ vtd, num }` entries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;

/// A description ready to be turned into a virtual thing.
pub struct Launch {
    pub source: PathBuf,
    pub vtd: Value,
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// The `index`-th copy of a description launched several times.
fn numbered(vtd: &Value, index: u64) -> Value {
    let mut copy = vtd.clone();
    if let Some(object) = copy.as_object_mut() {
        if let Some(title) = object.get("title").and_then(Value::as_str) {
            let title = format!("{title}_{index}");
            object.insert("title".to_owned(), Value::String(title));
        }
        if let Some(id) = object.get("id").and_then(Value::as_str) {
            let id = format!("{id}:n-{index}");
            object.insert("id".to_owned(), Value::String(id));
        }
    }
    copy
}

pub fn load(path: &Path) -> Result<Vec<Launch>> {
    let document = read_json(path)?;
    let Value::Array(entries) = document else {
        return Ok(vec![Launch {
            source: path.to_owned(),
            vtd: document,
        }]);
    };
    let base = path.parent().unwrap_or(Path::new("."));
    let mut launches = Vec::new();
    for entry in entries {
        let Some(vtd_path) = entry.get("vtd").and_then(Value::as_str) else {
            bail!("{}: launch entry without a \"vtd\" path: {entry}", path.display());
        };
        let num = entry.get("num").and_then(Value::as_u64).unwrap_or(1);
        let source = base.join(vtd_path);
        let vtd = read_json(&source)?;
        if num <= 1 {
            launches.push(Launch { source, vtd });
            continue;
        }
        for index in 1..=num {
            launches.push(Launch {
                source: source.clone(),
                vtd: numbered(&vtd, index),
            });
        }
    }
    Ok(launches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_get_numbered_titles_and_ids() {
        let vtd = json!({ "title": "lamp", "id": "urn:lamp" });
        assert_eq!(numbered(&vtd, 2), json!({ "title": "lamp_2", "id": "urn:lamp:n-2" }));
    }

    #[test]
    fn missing_keys_stay_missing() {
        assert_eq!(numbered(&json!({ "title": "lamp" }), 1), json!({ "title": "lamp_1" }));
    }

    #[test]
    fn array_entries_are_expanded() {
        let dir = std::env::temp_dir().join(format!("vt-launch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("lamp.json"), r#"{ "title": "lamp" }"#).unwrap();
        std::fs::write(dir.join("launch.json"), r#"[{ "vtd": "lamp.json", "num": 3 }, { "vtd": "lamp.json" }]"#).unwrap();

        let launches = load(&dir.join("launch.json")).unwrap();
        let titles: Vec<_> = launches.iter().map(|launch| launch.vtd["title"].clone()).collect();
        assert_eq!(titles, vec![json!("lamp_1"), json!("lamp_2"), json!("lamp_3"), json!("lamp")]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
