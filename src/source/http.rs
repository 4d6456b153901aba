//! Remote XYZ tile server backend.
//!
//! Tiles are never fetched on the caller's thread: [`HttpTileSource::load`]
//! only resolves the URL and returns an [`HttpTileFetch`] job, which the
//! manager runs on its dispatch queue. Rows are top-origin on the wire, so no
//! flip is applied.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use super::template::UrlTemplate;
use super::{check_tile_size, decode_sized, HttpSourceConfig, TileFetch, TileLoad, TileSource};
use crate::dispatch::DrainOrder;
use crate::error::{ConfigError, FetchError};
use crate::geo::{TileAddress, ZoomRange};
use crate::tile::DecodedTile;

/// Default port for a bare host name.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default per-request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// HTTP Tile Source
// =============================================================================

/// Tile source backed by a remote HTTP tile server.
#[derive(Debug)]
pub struct HttpTileSource {
    server: String,
    port: u16,
    template: UrlTemplate,
    base: Url,
    client: Client,
    zoom_range: ZoomRange,
    tile_size: u32,
}

impl HttpTileSource {
    /// Validate the configuration and build the HTTP client.
    ///
    /// The client is blocking; construct and drop the source outside of an
    /// async runtime.
    pub fn new(config: HttpSourceConfig) -> Result<Self, ConfigError> {
        check_tile_size(config.tile_size)?;
        let template = UrlTemplate::parse(&config.url)?;
        let base = base_url(&config.server, config.port)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            server: config.server,
            port: config.port,
            template,
            base,
            client,
            zoom_range: config.zoom_range,
            tile_size: config.tile_size,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url_template(&self) -> &UrlTemplate {
        &self.template
    }

    /// Point the source at another server. Leaves the source unchanged on
    /// error.
    pub fn set_server(&mut self, server: impl Into<String>) -> Result<(), ConfigError> {
        let server = server.into();
        self.base = base_url(&server, self.port)?;
        self.server = server;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        self.base = base_url(&self.server, port)?;
        self.port = port;
        Ok(())
    }

    pub fn set_url(&mut self, url: &str) -> Result<(), ConfigError> {
        self.template = UrlTemplate::parse(url)?;
        Ok(())
    }

    /// Full URL for a tile. The rendered template is relative to the server
    /// URL's path, with or without a leading `/`.
    pub fn tile_url(&self, address: TileAddress) -> Result<Url, FetchError> {
        let path = self.template.render(address);
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| FetchError::Connection(format!("invalid tile URL '{path}': {e}")))
    }
}

impl TileSource for HttpTileSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError> {
        let url = self.tile_url(address)?;
        Ok(TileLoad::Deferred(Box::new(HttpTileFetch {
            address,
            url,
            client: self.client.clone(),
            tile_size: self.tile_size,
        })))
    }

    fn drain_order(&self) -> DrainOrder {
        DrainOrder::Lifo
    }
}

/// Build the base URL from a host name or a URL with scheme.
///
/// A bare host gets `http://` and `port`. A URL with scheme keeps its own port
/// unless `port` differs from [`DEFAULT_HTTP_PORT`].
fn base_url(server: &str, port: u16) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidServer {
        server: server.to_string(),
        reason,
    };

    let server = server.trim();
    if server.is_empty() {
        return Err(invalid("server is empty".into()));
    }

    let mut url = if server.contains("://") {
        let mut url = Url::parse(server).map_err(|e| invalid(e.to_string()))?;
        if port != DEFAULT_HTTP_PORT {
            url.set_port(Some(port))
                .map_err(|_| invalid("URL cannot carry a port".into()))?;
        }
        url
    } else {
        Url::parse(&format!("http://{server}:{port}/")).map_err(|e| invalid(e.to_string()))?
    };

    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL".into()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

// =============================================================================
// Fetch Job
// =============================================================================

/// One pending GET for a tile.
pub struct HttpTileFetch {
    address: TileAddress,
    url: Url,
    client: Client,
    tile_size: u32,
}

impl HttpTileFetch {
    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for HttpTileFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {} for tile {}", self.url, self.address)
    }
}

impl TileFetch for HttpTileFetch {
    fn fetch(self: Box<Self>) -> Result<Option<DecodedTile>, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body = response.bytes().map_err(request_error)?;
        debug!(url = %self.url, bytes = body.len(), "Fetched tile");

        Ok(Some(decode_sized(&body, self.tile_size)?))
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else {
        FetchError::Connection(e.to_string())
    }
}
