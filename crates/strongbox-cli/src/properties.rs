use std::io::Write;

use color_eyre::{eyre::bail, Result};
use strongbox_core::PropertiesFactory;
use strongbox_storage::adapter::{decode_value, encode_value};

use crate::cli::Command;

/// Execute a container subcommand against `factory`, printing to `out`.
pub fn handle(cmd: Command, factory: &dyn PropertiesFactory, out: &mut impl Write) -> Result<()> {
    match cmd {
        Command::Get { uri, key, base64 } => {
            let value = factory.properties(&uri)?.get_bytes(&key)?;
            if base64 {
                writeln!(out, "{}", encode_value(&value))?;
            } else {
                match String::from_utf8(value) {
                    Ok(text) => writeln!(out, "{text}")?,
                    Err(err) => writeln!(out, "{}", encode_value(err.as_bytes()))?,
                }
            }
        }
        Command::Put {
            uri,
            key,
            value,
            base64,
        } => {
            let bytes = if base64 {
                decode_value(&value).map_err(|e| color_eyre::eyre::eyre!(e))?
            } else {
                value.into_bytes()
            };
            factory.properties(&uri)?.put_bytes(&key, &bytes)?;
            writeln!(out, "Stored {key} in {uri}")?;
        }
        Command::Remove { uri, key } => {
            factory.properties(&uri)?.remove(&key)?;
            writeln!(out, "Removed {key} from {uri}")?;
        }
        Command::Keys { uri } => {
            let mut keys: Vec<_> = factory.properties(&uri)?.keys()?.into_iter().collect();
            if keys.is_empty() {
                writeln!(out, "No values in {uri}.")?;
                return Ok(());
            }
            keys.sort();
            for key in keys {
                writeln!(out, "{key}")?;
            }
        }
        Command::Clear { uri, yes } => {
            if !yes {
                bail!("refusing to clear {uri} without --yes");
            }
            factory.properties(&uri)?.clear()?;
            writeln!(out, "Cleared {uri}")?;
        }
        other => bail!("not a container command: {other:?}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    fn run(factory: &dyn PropertiesFactory, cmd: Command) -> Result<String> {
        let mut out = Vec::new();
        handle(cmd, factory, &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    #[test]
    fn put_get_keys_remove_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = storage::test_factory(dir.path());
        let uri = "component/config".to_string();

        run(
            &factory,
            Command::Put {
                uri: uri.clone(),
                key: "token".into(),
                value: "secret".into(),
                base64: false,
            },
        )
        .expect("put");
        let got = run(
            &factory,
            Command::Get {
                uri: uri.clone(),
                key: "token".into(),
                base64: false,
            },
        )
        .expect("get");
        assert_eq!(got, "secret\n");

        let keys = run(&factory, Command::Keys { uri: uri.clone() }).expect("keys");
        assert_eq!(keys, "token\n");

        run(
            &factory,
            Command::Remove {
                uri: uri.clone(),
                key: "token".into(),
            },
        )
        .expect("remove");
        let keys = run(&factory, Command::Keys { uri }).expect("keys");
        assert_eq!(keys, "No values in component/config.\n");
    }

    #[test]
    fn binary_values_use_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = storage::test_factory(dir.path());

        run(
            &factory,
            Command::Put {
                uri: "component/config".into(),
                key: "blob".into(),
                value: "AP8A".into(),
                base64: true,
            },
        )
        .expect("put");
        let got = run(
            &factory,
            Command::Get {
                uri: "component/config".into(),
                key: "blob".into(),
                base64: false,
            },
        )
        .expect("get");
        assert_eq!(got, "AP8A\n");
    }

    #[test]
    fn clear_requires_confirmation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = storage::test_factory(dir.path());
        let err = run(
            &factory,
            Command::Clear {
                uri: "component/config".into(),
                yes: false,
            },
        )
        .expect_err("unconfirmed");
        assert!(err.to_string().contains("--yes"));

        run(
            &factory,
            Command::Clear {
                uri: "component/config".into(),
                yes: true,
            },
        )
        .expect("confirmed clear");
    }
}
