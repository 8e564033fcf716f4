// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading and validating configuration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file '{}' doesn't have a recognised file extension! Valid extensions are: {valid}", file.display())]
    UnknownExtension { file: PathBuf, valid: String },

    #[error("Couldn't decode toml structure from '{}':\n{err}", file.display())]
    Toml {
        file: PathBuf,
        err: toml::de::Error,
    },

    #[error("Couldn't decode json structure from '{}':\n{err}", file.display())]
    Json {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error("Couldn't encode the config as toml: {0}")]
    TomlSerialise(#[from] toml::ser::Error),

    #[error("'{field}' {requirement}; got {value}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
