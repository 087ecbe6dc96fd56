use std::path::PathBuf;

use reqwest::{Client, StatusCode};
use semver::Version;
use tokio::fs;

use crate::{config::Context, CorectlError, CorectlResult};

use super::{
    customize_initrd, download_verified, expected_sha512, Channel, ImageRef, ImageStore,
    SignatureVerifier, VersionSpec, DIGESTS_SUFFIX, INITRD_FILENAME, KERNEL_FILENAME,
    VERSION_MANIFEST,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The key of the version manifest naming the release.
const VERSION_KEY: &str = "COREOS_VERSION";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A locally available, verified and customized image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    /// The release channel.
    pub channel: Channel,

    /// The concrete version.
    pub version: Version,

    /// The kernel.
    pub kernel: PathBuf,

    /// The customized initramfs.
    pub initrd: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LocalImage {
    fn new(store: &ImageStore, channel: Channel, version: Version) -> Self {
        Self {
            kernel: store.kernel_path(channel, &version),
            initrd: store.initrd_path(channel, &version),
            channel,
            version,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Asks upstream for the newest release of a channel.
pub async fn latest_upstream(
    ctx: &Context,
    client: &Client,
    channel: Channel,
) -> CorectlResult<Version> {
    let url = format!("{}/{VERSION_MANIFEST}", ctx.release_url_for(channel));
    let manifest = fetch_text(client, &url).await?;

    let version = manifest
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == VERSION_KEY)
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| {
            CorectlError::custom(anyhow::anyhow!("{url} does not name a {VERSION_KEY}"))
        })?;

    Ok(Version::parse(&version)?)
}

/// Makes sure an image is available locally, pulling it if needed.
///
/// `latest` is resolved against upstream, or against the local store when `prefer_local` is
/// set and something is available there. When upstream can't be reached the newest local
/// version is used, and only if there is none does the lookup fail with
/// [`CorectlError::Offline`]. An image already present is left alone unless `force` is set.
pub async fn lookup_image(
    ctx: &Context,
    client: &Client,
    verifier: &dyn SignatureVerifier,
    image: &ImageRef,
    force: bool,
    prefer_local: bool,
) -> CorectlResult<LocalImage> {
    let store = ImageStore::new(ctx.images_dir());
    let channel = image.channel;

    let version = match &image.version {
        VersionSpec::Exact(version) => version.clone(),
        VersionSpec::Latest => {
            let newest_local = store.newest(channel).await?;
            match newest_local {
                Some(local) if prefer_local => local,
                _ => match latest_upstream(ctx, client, channel).await {
                    Ok(version) => version,
                    Err(e) => {
                        let local =
                            newest_local.ok_or_else(|| CorectlError::Offline(channel.to_string()))?;
                        tracing::warn!("unable to reach upstream ({e}), using {channel}/{local}");
                        local
                    }
                },
            }
        }
    };

    if store.contains(channel, &version) && !force {
        tracing::info!("{channel}/{version} already available on your system");
        return Ok(LocalImage::new(&store, channel, version));
    }

    localize(ctx, client, verifier, &store, channel, &version).await?;
    Ok(LocalImage::new(&store, channel, version))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Downloads, verifies and customizes an image, then moves it into the store.
///
/// Everything happens in a hidden staging directory inside the channel directory, which is
/// renamed into place only once complete and otherwise removed.
async fn localize(
    ctx: &Context,
    client: &Client,
    verifier: &dyn SignatureVerifier,
    store: &ImageStore,
    channel: Channel,
    version: &Version,
) -> CorectlResult<()> {
    tracing::info!("downloading and verifying {channel}/{version}");

    let channel_dir = store.channel_dir(channel);
    fs::create_dir_all(&channel_dir).await?;
    let staging = tempfile::Builder::new()
        .prefix(".pull-")
        .tempdir_in(&channel_dir)?;

    let root = format!("{}/{version}", ctx.release_url_for(channel));
    for file in [KERNEL_FILENAME, INITRD_FILENAME] {
        let signed = fetch_text(client, &format!("{root}/{file}{DIGESTS_SUFFIX}")).await?;
        let digests = verifier.verify(signed.as_bytes()).await?;
        let expected = expected_sha512(&digests, file).ok_or_else(|| {
            CorectlError::Verification(format!("no SHA512 digest for {file} in DIGESTS"))
        })?;

        download_verified(
            client,
            &format!("{root}/{file}"),
            &staging.path().join(file),
            &expected,
        )
        .await?;
    }

    customize_initrd(&staging.path().join(INITRD_FILENAME), version).await?;

    let dest = store.version_dir(channel, version);
    if dest.exists() {
        fs::remove_dir_all(&dest).await?;
    }
    fs::rename(staging.path(), &dest).await?;

    tracing::info!("{channel}/{version} ready");
    Ok(())
}

/// GETs `url` as text, accepting only `200 OK` and `204 No Content`.
async fn fetch_text(client: &Client, url: &str) -> CorectlResult<String> {
    let response = client.get(url).send().await?;
    match response.status() {
        StatusCode::OK | StatusCode::NO_CONTENT => Ok(response.text().await?),
        status => Err(CorectlError::custom(anyhow::anyhow!(
            "failed fetching {url}: HTTP status {status}"
        ))),
    }
}
