use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use faceclass_vision::{Error, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Bijective class name ↔ index mapping.
///
/// Indices always cover `0..len()` exactly once, so the inverse lookup is a
/// plain vector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>")]
pub struct LabelDictionary {
    by_name: HashMap<String, usize>,
    by_index: Vec<String>,
}

impl LabelDictionary {
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.by_index.get(index).map(String::as_str)
    }

    /// Like [`name_of`](Self::name_of), reporting unknown indices as an error
    pub fn expect_name(&self, index: usize) -> Result<&str> {
        self.name_of(index).ok_or(Error::UnknownClassIndex {
            index,
            classes: self.len(),
        })
    }

    /// `(name, index)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_index
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    /// Read and validate a JSON `{ "name": index }` file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::resource(path, e))?;
        let dict = Self::from_json(&text).map_err(|reason| Error::resource(path, reason))?;
        log::debug!("{} classes in {}", dict.len(), path.display());
        Ok(dict)
    }
}

impl TryFrom<BTreeMap<String, i64>> for LabelDictionary {
    type Error = String;

    fn try_from(map: BTreeMap<String, i64>) -> std::result::Result<Self, String> {
        if map.is_empty() {
            return Err("label dictionary is empty".into());
        }

        let n = map.len();
        let mut by_index: Vec<Option<String>> = vec![None; n];
        for (name, &index) in &map {
            let slot = match usize::try_from(index).ok().filter(|&i| i < n) {
                Some(i) => &mut by_index[i],
                None => {
                    return Err(format!(
                        "index {} of {:?} is outside 0..{}",
                        index, name, n
                    ))
                }
            };
            if let Some(other) = slot.as_ref() {
                return Err(format!("{:?} and {:?} share index {}", other, name, index));
            }
            *slot = Some(name.clone());
        }

        // n distinct slots filled by n names, none can be empty
        let by_index: Vec<String> = by_index.into_iter().flatten().collect();
        let by_name = by_index
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Ok(Self { by_name, by_index })
    }
}

impl Serialize for LabelDictionary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, index) in self.iter() {
            map.serialize_entry(name, &index)?;
        }
        map.end()
    }
}
