// Dictionary: engine key/value map with Variant keys and values. Clones
// share one payload.

use std::fmt;

use super::{Array, Pooled, arg};
use crate::api::api;
use crate::error::BindResult;
use crate::variant::{FromVariant, ToVariant, Variant};

const SIZE_HASH: i64 = 3173160232;
const HAS_HASH: i64 = 3680194679;
const ERASE_HASH: i64 = 1776646889;
const CLEAR_HASH: i64 = 3218959716;
const KEYS_HASH: i64 = 4144163970;
const VALUES_HASH: i64 = 4144163970;

#[derive(Clone)]
pub struct Dictionary(pub(crate) Pooled<1>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.call::<i64>("size", SIZE_HASH, &[]).unwrap_or(0).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: impl ToVariant) -> bool {
        let key = key.to_variant();
        let token = key.token();
        self.0.call::<bool>("has", HAS_HASH, &[arg(&token)]).unwrap_or(false)
    }

    /// Copy of the value for `key`.
    pub fn get(&self, key: impl ToVariant) -> Option<Variant> {
        let key = key.to_variant();
        let key_token = key.token();
        if !self.0.call::<bool>("has", HAS_HASH, &[arg(&key_token)]).ok()? {
            return None;
        }
        let mut token = self.0.token();
        unsafe {
            let ptr = ((*api().builtins).dictionary_operator_index)(
                token.as_mut_ptr(),
                key_token.as_ptr(),
            );
            Some(Variant::from_borrowed_ptr(ptr))
        }
    }

    /// Decode the value for `key`. A missing key decodes as Nil.
    pub fn get_as<T: FromVariant>(&self, key: impl ToVariant) -> BindResult<T> {
        T::try_from_variant(&self.get(key).unwrap_or_default())
    }

    pub fn set(&mut self, key: impl ToVariant, value: impl ToVariant) {
        let key = key.to_variant();
        let key_token = key.token();
        let value = value.to_variant();
        self.0.update(|token| unsafe {
            let ptr = ((*api().builtins).dictionary_operator_index)(
                token.as_mut_ptr(),
                key_token.as_ptr(),
            );
            value.write_to(ptr);
        });
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, key: impl ToVariant) -> Option<Variant> {
        let key = key.to_variant();
        let previous = self.get(&key)?;
        let key_token = key.token();
        self.0
            .call_mut::<bool>("erase", ERASE_HASH, &[arg(&key_token)])
            .ok()?;
        Some(previous)
    }

    pub fn clear(&mut self) {
        let _ = self.0.call_mut::<()>("clear", CLEAR_HASH, &[]);
    }

    pub fn keys(&self) -> Array {
        self.array_of("keys", KEYS_HASH)
    }

    pub fn values(&self) -> Array {
        self.array_of("values", VALUES_HASH)
    }

    fn array_of(&self, method: &'static str, hash: i64) -> Array {
        match self.0.call_pooled::<1>(method, hash, gdbind_ffi::VariantType::Array, &[]) {
            Ok(raw) => Array::from_raw(raw),
            Err(e) => {
                crate::glog!(crate::logging::LOG_ERROR, "[gdbind] Dictionary::{method}: {e}");
                Array::new()
            }
        }
    }

    /// Key/value pairs in insertion order. Stops early if the dictionary
    /// changes size underneath.
    pub fn iter(&self) -> DictionaryIter<'_> {
        DictionaryIter {
            dict: self,
            keys: self.keys(),
            index: 0,
            len: self.len(),
        }
    }

    /// Both handles share one engine payload.
    pub fn is_same(&self, other: &Dictionary) -> bool {
        self.0.is_same(&other.0)
    }
}

impl<K: ToVariant, V: ToVariant> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other) || self.to_variant() == other.to_variant()
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dictionary({})", self.to_variant())
    }
}

pub struct DictionaryIter<'a> {
    dict: &'a Dictionary,
    keys: Array,
    index: usize,
    len: usize,
}

impl Iterator for DictionaryIter<'_> {
    type Item = (Variant, Variant);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len || self.dict.len() != self.len {
            return None;
        }
        let key = self.keys.get(self.index)?;
        self.index += 1;
        let value = self.dict.get(&key)?;
        Some((key, value))
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (Variant, Variant);
    type IntoIter = DictionaryIter<'a>;

    fn into_iter(self) -> DictionaryIter<'a> {
        self.iter()
    }
}

pooled_values! {
    Dictionary => Dictionary, 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn set_get_remove() {
        let _engine = testing::session();
        let mut d = Dictionary::new();
        d.set("a", 1);
        d.set("b", "two");
        assert_eq!(d.len(), 2);
        assert!(d.contains_key("a"));
        assert_eq!(d.get_as::<i64>("a"), Ok(1));
        assert_eq!(d.get("missing"), None);
        assert_eq!(d.get_as::<Option<i64>>("missing"), Ok(None));
        d.set("a", 3);
        assert_eq!(d.get_as::<i64>("a"), Ok(3));
        assert_eq!(d.remove("a").and_then(|v| v.to::<i64>().ok()), Some(3));
        assert_eq!(d.remove("a"), None);
        d.clear();
        assert!(d.is_empty());
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let _engine = testing::session();
        let d: Dictionary = [("x", 1), ("y", 2), ("z", 3)].into_iter().collect();
        let pairs: Vec<(String, i64)> = d
            .iter()
            .map(|(k, v)| (k.to::<String>().unwrap(), v.to::<i64>().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![("x".to_string(), 1i64), ("y".to_string(), 2), ("z".to_string(), 3)]
        );
        assert_eq!(d.keys().len(), 3);
    }

    #[test]
    fn equality_is_by_value_and_identity_is_by_payload() {
        let _engine = testing::session();
        let a: Dictionary = [("k", 1)].into_iter().collect();
        let b = a.clone();
        let c: Dictionary = [("k", 1)].into_iter().collect();
        assert!(a.is_same(&b));
        assert!(!a.is_same(&c));
        assert_eq!(a, c);
    }
}
