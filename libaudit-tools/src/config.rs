use std::io;
use std::str::FromStr;

/// Configuration, backed by a toml document.
///
/// Keys are dotted paths: `get("reassembly.flush_every")` looks up
/// `flush_every` in the `[reassembly]` table.
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn get_value<T: AsRef<str>>(&self, k: T) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.get_value(k)?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.get_value(k)?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get an entry of type integer by path, as an u64
    pub fn get_u64<T: AsRef<str>>(&self, k: T) -> Option<u64> {
        self.get_value(k)?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as u64) } else { None })
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.get_value(k)?.as_bool()
    }

    /// Set an entry by path. Intermediate path elements must already exist
    pub fn set<T, V>(&mut self, k: T, v: V) -> Option<()>
    where
        T: AsRef<str>,
        toml::value::Value: std::convert::From<V>,
    {
        let mut item = &mut self.value;
        let path: Vec<_> = k.as_ref().split('.').collect();
        if path.len() > 1 {
            for key in path.iter().take(path.len() - 1) {
                item = item.get_mut(key)?;
            }
        }
        let t = item.as_table_mut()?;
        let p = path.last()?;
        t.insert((*p).to_string(), toml::Value::from(v));
        Some(())
    }

    /// Add a new (empty) section at location path.
    /// To insert at root, use an empty path.
    pub fn add_section<T: AsRef<str>, V: ToString>(&mut self, parent: T, table_name: V) -> Option<()> {
        let mut item = &mut self.value;
        if !parent.as_ref().is_empty() {
            for key in parent.as_ref().split('.') {
                item = item.get_mut(key)?;
            }
        }
        let t = item.as_table_mut()?;
        t.insert(
            table_name.to_string(),
            toml::Value::Table(toml::map::Map::new()),
        );
        Some(())
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::Value::from_str(&s) {
            Ok(value) => {
                self.value = value;
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Load configuration failed",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn config_set_get() {
        let mut config = Config::default();
        assert!(config.set("key1", "value1").is_some());
        assert_eq!(config.get("key1"), Some("value1"));
        assert!(config.add_section("", "reassembly").is_some());
        assert!(config.set("reassembly.flush_every", 100).is_some());
        assert_eq!(config.get_usize("reassembly.flush_every"), Some(100));
        assert_eq!(config.get_usize("reassembly.missing"), None);
    }

    #[test]
    fn config_load() {
        let mut config = Config::default();
        let toml = "[tracker]\nconn_timeout = 120\nlocal_dns = true\n";
        config.load_config(toml.as_bytes()).expect("load");
        assert_eq!(config.get_u64("tracker.conn_timeout"), Some(120));
        assert_eq!(config.get_bool("tracker.local_dns"), Some(true));
    }
}
