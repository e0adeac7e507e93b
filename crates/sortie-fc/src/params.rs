use std::collections::HashMap;

use mavlink::common::PARAM_VALUE_DATA;

/// Parameters streamed by a vehicle in reply to PARAM_REQUEST_LIST.
#[derive(Debug, Clone, Default)]
pub struct ParamCache {
    values: HashMap<String, f32>,
    expected: Option<u16>,
}

impl ParamCache {
    pub fn insert(&mut self, name: String, value: f32, count: u16) {
        self.values.insert(name, value);
        if count > 0 {
            self.expected = Some(count);
        }
    }

    pub fn on_param_value(&mut self, data: &PARAM_VALUE_DATA) {
        let name = param_name(data);
        self.insert(name, data.param_value, data.param_count);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every parameter the vehicle announced has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.expected, Some(n) if self.values.len() >= n as usize)
    }

    pub fn snapshot(&self) -> HashMap<String, f32> {
        self.values.clone()
    }
}

/// param_id is a NUL padded 16 byte name.
fn param_name(data: &PARAM_VALUE_DATA) -> String {
    data.param_id
        .iter()
        .map(|&c| c as u8 as char)
        .take_while(|&c| c != '\0')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_once_announced_count_arrives() {
        let mut p = ParamCache::default();
        assert!(!p.is_complete());
        p.insert("THR_MIN".into(), 130.0, 2);
        assert!(!p.is_complete());
        p.insert("THR_MIN".into(), 131.0, 2);
        assert!(!p.is_complete());
        p.insert("RTL_ALT".into(), 1500.0, 2);
        assert!(p.is_complete());
        assert_eq!(p.get("THR_MIN"), Some(131.0));
        assert_eq!(p.len(), 2);
    }
}
