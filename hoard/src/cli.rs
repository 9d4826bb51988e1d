use clap::{Parser, Subcommand};
use libhoard::config::DEFAULT_REMOTE_WEIGHT;
use libhoard::error::HoardResult;
use libhoard::sync::DEFAULT_SYNC_INTERVAL;
use libhoard::Storage;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hoard", about = "a distributed content-addressed versioned filesystem")]
struct HoardCliOpts {
    /// storage directory (defaults to the per-user data directory)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    #[command(subcommand)]
    subcmd: HoardSubCmd,
}

#[derive(Subcommand)]
enum HoardSubCmd {
    /// initialize (or reopen) a storage and print its id
    Init,
    /// print the storage id
    Id,
    #[command(subcommand)]
    Box(BoxSubCmd),
    #[command(subcommand)]
    Remote(RemoteSubCmd),
    #[command(subcommand)]
    Config(ConfigSubCmd),
    /// seal the working record of a box into a commit now
    Commit {
        #[arg(default_value = "master")]
        box_name: String,
    },
    /// push, fetch and merge with every remote once
    Sync,
    /// run the background syncer and periodic committer in the foreground
    Serve {
        #[arg(default_value = "master")]
        box_name: String,
        /// seconds between automatic commits
        #[arg(long, default_value_t = 60)]
        commit_interval: u64,
    },
}

#[derive(Subcommand)]
enum BoxSubCmd {
    /// create a box (a named branch head)
    Create { name: String },
    /// list the boxes of this storage
    List,
    /// list the records of a box, newest first
    Log { name: String },
}

#[derive(Subcommand)]
enum RemoteSubCmd {
    /// register a peer by name, url and weight
    Add {
        name: String,
        url: String,
        #[arg(default_value_t = DEFAULT_REMOTE_WEIGHT)]
        weight: i32,
    },
    Remove { name: String },
    List,
}

#[derive(Subcommand)]
enum ConfigSubCmd {
    /// print the configuration document
    Get,
    /// replace the configuration document with the given json
    Set { json: String },
}

pub fn run<T: Into<OsString> + Clone>(args: impl IntoIterator<Item = T>) -> HoardResult<()> {
    let opts = HoardCliOpts::parse_from(args);
    let path = opts.storage.unwrap_or_else(Storage::default_path);
    let storage = Storage::open(&path)?;

    match opts.subcmd {
        HoardSubCmd::Init => {
            println!("storage `{}` has id {}", path.display(), storage.id()?);
        }
        HoardSubCmd::Id => println!("{}", storage.id()?),
        HoardSubCmd::Box(subcmd) => run_box_cmd(&storage, subcmd)?,
        HoardSubCmd::Remote(subcmd) => run_remote_cmd(&storage, subcmd)?,
        HoardSubCmd::Config(subcmd) => run_config_cmd(&storage, subcmd)?,
        HoardSubCmd::Commit { box_name } => {
            match storage.open_box(&box_name)?.commit()? {
                Some(oid) => println!("committed {}", oid),
                None => println!("nothing to commit"),
            }
            storage.push()?;
        }
        HoardSubCmd::Sync => {
            storage.push()?;
            storage.fetch()?;
            for name in storage.list_boxes()? {
                storage.open_box(&name)?.update_from_remotes()?;
            }
        }
        HoardSubCmd::Serve { box_name, commit_interval } => {
            let hoard_box = storage.open_box(&box_name)?;
            let _committer = libhoard::boxes::TimeCommitter::spawn(
                hoard_box,
                Duration::from_secs(commit_interval),
            );
            let _syncer = storage.start_syncer(DEFAULT_SYNC_INTERVAL);
            println!("serving box `{}` from `{}`", box_name, path.display());
            loop {
                std::thread::park();
            }
        }
    }
    Ok(())
}

fn run_box_cmd(storage: &Storage, subcmd: BoxSubCmd) -> HoardResult<()> {
    match subcmd {
        BoxSubCmd::Create { name } => {
            storage.open_box(&name)?;
            storage.with_config(|config| {
                config.boxes.entry(name.clone()).or_default();
            })?;
        }
        BoxSubCmd::List =>
            for name in storage.list_boxes()? {
                println!("{}", name);
            },
        BoxSubCmd::Log { name } => {
            let hoard_box = storage.open_box(&name)?;
            for (oid, commit_time, message) in hoard_box.log()? {
                println!("{} {} {}", oid, commit_time, message);
            }
        }
    }
    Ok(())
}

fn run_remote_cmd(storage: &Storage, subcmd: RemoteSubCmd) -> HoardResult<()> {
    match subcmd {
        RemoteSubCmd::Add { name, url, weight } => storage.add_remote(&name, &url, weight)?,
        RemoteSubCmd::Remove { name } => storage.remove_remote(&name)?,
        RemoteSubCmd::List =>
            for (name, url, weight) in storage.list_remotes() {
                println!("{}\t{}\t{}", name, url, weight);
            },
    }
    Ok(())
}

fn run_config_cmd(storage: &Storage, subcmd: ConfigSubCmd) -> HoardResult<()> {
    match subcmd {
        ConfigSubCmd::Get => {
            let config = storage.config()?;
            println!("{}", String::from_utf8_lossy(&config.to_bytes()?));
        }
        ConfigSubCmd::Set { json } => {
            let config = libhoard::config::HoardConfig::parse(json.as_bytes())
                .map_err(|err| anyhow!("invalid configuration document: {}", err))?;
            storage.set_config(&config)?;
        }
    }
    Ok(())
}
