use std::{env::VarError, str::FromStr};

use crate::error::{Error, Result};

pub fn var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|err| {
        if let VarError::NotPresent = err {
            Error::MissingEnvVar(name.to_string())
        } else {
            Error::other(err)
        }
    })
}

pub fn try_var(name: &str) -> Result<Option<String>> {
    match var(name) {
        Ok(value) => Ok(Some(value)),
        Err(Error::MissingEnvVar(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    let Some(value) = try_var(name)? else {
        return Ok(None);
    };

    match value.trim().parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(Error::InvalidEnvVar {
            name: name.to_owned(),
            value,
        }),
    }
}
