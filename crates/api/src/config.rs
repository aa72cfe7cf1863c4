//! Types for use when configuring folio modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> FolioResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| FolioError::other_src("encode", e))?,
    )
    .map_err(|e| FolioError::other_src("decode", e))
}

/// Denotes a type used to configure a specific folio module.
///
/// A module config is a struct with a single camelCase field named
/// after the module, holding the actual parameters. All module configs
/// share one json object, so module names must not collide.
///
/// Note, the types defined in this struct are specifically for
/// configuration that cannot be changed at runtime, the likes of which
/// might be found in a configuration file.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Folio configuration.
///
/// Written through `&mut self` while the [Builder](crate::builder::Builder)
/// is being set up, read-only once the builder is frozen in an `Arc`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Merge a module config into this config. Top-level keys of the
    /// module config replace any existing keys of the same name.
    ///
    /// Module factories call this from their `default_config` to make
    /// the defaults visible, hosts call it to override parameters
    /// before the builder is frozen.
    pub fn set_module_config<M: ModConfig>(
        &mut self,
        module_config: &M,
    ) -> FolioResult<()> {
        let value: serde_json::Value = tc(module_config)?;
        let serde_json::Value::Object(map) = value else {
            return Err(FolioError::other(
                "module config must serialize to a json object",
            ));
        };
        self.0.extend(map);
        Ok(())
    }

    /// Extract a module config. Note that this config may have been
    /// loaded from disk and edited by humans, so module configs should
    /// be tolerant to missing properties, setting sane defaults
    /// via `#[serde(default)]`. Properties belonging to other modules
    /// are ignored.
    pub fn get_module_config<M: ModConfig>(&self) -> FolioResult<M> {
        tc(&self.0)
    }
}
