//! Image commands: pull, list and remove.

use std::collections::BTreeMap;

use reqwest::Client;
use semver::Version;

use crate::{
    cli::AnsiStyles,
    config::Context,
    image::{lookup_image, Channel, GpgVerifier, ImageRef, ImageStore, LocalImage, VersionSpec},
    CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Downloads, verifies and customizes an image, unless it's already available.
pub async fn pull(
    ctx: &Context,
    channel: &str,
    version: &str,
    force: bool,
) -> CorectlResult<LocalImage> {
    ctx.ensure_dirs().await?;

    let image = ImageRef::new(Channel::normalize(channel), VersionSpec::normalize(version));
    let client = Client::builder().build()?;
    let verifier = GpgVerifier::new(ctx.get_gpg_exe());

    let local = lookup_image(ctx, &client, &verifier, &image, force, false).await?;
    println!("{}/{}", local.channel, local.version);
    Ok(local)
}

/// Lists the local versions of one channel, or of every channel when `all` is set.
pub async fn ls(ctx: &Context, channel: &str, all: bool, json: bool) -> CorectlResult<()> {
    let listing = local_images(ctx, channel, all).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for (channel, versions) in &listing {
        println!("{}", format!("{channel}:").header());
        for version in versions {
            println!("  {version}");
        }
    }
    Ok(())
}

/// Removes local images.
///
/// `latest` means the newest local version. With `old`, every version but the newest is
/// removed instead. Asking for a version that isn't there is not an error.
pub async fn rm(
    ctx: &Context,
    channel: &str,
    version: &str,
    old: bool,
) -> CorectlResult<Vec<Version>> {
    let store = ImageStore::new(ctx.images_dir());
    let channel = Channel::normalize(channel);

    if old {
        let removed = store.prune(channel).await?;
        if removed.is_empty() {
            tracing::info!("no old {channel} images to remove");
        }
        return Ok(removed);
    }

    let version = match VersionSpec::normalize(version) {
        VersionSpec::Exact(version) => version,
        VersionSpec::Latest => match store.newest(channel).await? {
            Some(version) => version,
            None => {
                tracing::info!("no {channel} images available locally");
                return Ok(Vec::new());
            }
        },
    };

    if !store.remove(channel, &version).await? {
        tracing::info!("{channel}/{version} not available locally, nothing to remove");
        return Ok(Vec::new());
    }

    Ok(vec![version])
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn local_images(
    ctx: &Context,
    channel: &str,
    all: bool,
) -> CorectlResult<BTreeMap<Channel, Vec<Version>>> {
    let store = ImageStore::new(ctx.images_dir());
    let channels = if all {
        Channel::ALL.to_vec()
    } else {
        vec![Channel::normalize(channel)]
    };

    let mut listing = BTreeMap::new();
    for channel in channels {
        listing.insert(channel, store.local_versions(channel).await?);
    }
    Ok(listing)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
