// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of claroz.
//
// claroz is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// claroz is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with claroz.  If not,
// see <http://www.gnu.org/licenses/>.

//! # Introduction
//!
//! claroz is a small photo-sharing social network whose users can look up, and mirror, profiles
//! living on the [AT Protocol] network.
//!
//! [AT Protocol]: https://atproto.com

use std::{
    fmt::Display,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use chrono::Duration;
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use http::{header, HeaderName, HeaderValue, Method};
use opentelemetry::{global, KeyValue};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};
use url::Url;

use claroz::{
    atproto,
    claroz::{make_router as make_api_router, Claroz},
    memory::InMemory,
    metrics::check_metric_names,
    peppers::Peppers,
    postgres::{self, Postgres},
    signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
    uploads::{self, LocalFileStorage},
};

/// The claroz application error type
///
/// `main()` returns `Result<(), Error>`, so should it fail, the runtime will report the error
/// through its [Debug] implementation. The derived implementation is neither readable nor brief,
/// so [Debug] here just delegates to [Display].
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to create an AT Protocol client: {source}"))]
    AtProto { source: atproto::Error },
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("{origin} is not a valid CORS origin: {source}"))]
    CorsOrigin {
        origin: String,
        source: http::header::InvalidHeaderValue,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build the Prometheus exporter: {source}"))]
    Exporter {
        source: opentelemetry_sdk::metrics::MetricError,
    },
    #[snafu(display("Failed to connect to PostgreSQL: {source}"))]
    Postgres {
        #[snafu(source(from(postgres::Error, Box::new)))]
        source: Box<postgres::Error>,
    },
    #[snafu(display("Failed to install a handler for {signal}: {source}"))]
    Signal {
        signal: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
    #[snafu(display("Failed to set up upload storage: {source}"))]
    Uploads { source: uploads::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
enum DatabaseProvider {
    #[default]
    Postgres,
    /// Keep everything in process memory; nothing survives a restart. For development only.
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct DatabaseConfig {
    provider: DatabaseProvider,
    #[serde(flatten)]
    postgres: postgres::Config,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct FederationConfig {
    /// The AT Protocol service against which handles & DIDs are resolved
    pds_host: Url,
    enabled: bool,
    /// Per-request timeout, in seconds
    timeout: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        FederationConfig {
            pds_host: Url::parse("https://bsky.social").unwrap(/* known good */),
            enabled: true,
            timeout: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct CorsConfig {
    allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allowed_origin: "http://localhost:3000".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct SigningKeysConfig {
    /// Token lifetime, in seconds
    token_lifetime: i64,
    /// The `iss` claim in our tokens
    issuer: String,
    signing_keys: SigningKeys,
}

impl Default for SigningKeysConfig {
    fn default() -> Self {
        SigningKeysConfig {
            token_lifetime: 24 * 60 * 60,
            issuer: "claroz".to_owned(),
            signing_keys: SigningKeys::default(),
        }
    }
}

/// claroz configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ConfigV1 {
    /// Local address at which to listen for requests; specify as "address:port"
    public_address: SocketAddr,
    database: DatabaseConfig,
    storage: uploads::Config,
    federation: FederationConfig,
    cors: CorsConfig,
    pepper: Peppers,
    signing_keys: SigningKeysConfig,
    user_agent: String,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            public_address: "0.0.0.0:8080".parse::<SocketAddr>().unwrap(/* known good */),
            database: DatabaseConfig::default(),
            storage: uploads::Config::default(),
            federation: FederationConfig::default(),
            cors: CorsConfig::default(),
            pepper: Peppers::default(),
            signing_keys: SigningKeysConfig::default(),
            user_agent: format!("claroz/{}", crate_version!()),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the claroz configuration file
///
/// If no file was named & the default doesn't exist, run on the built-in defaults.
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/claroz.toml").unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// Build our tracing formatter & filter
///
/// `--plain` selects compact, human-readable output; otherwise we emit JSON. Either way, to
/// stdout.
fn configure_logging(
    logopts: &LogOpts,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `json()` & `compact()` produce layers of different types, hence the box:
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    Ok((formatter, filter))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      ops endpoints                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn otel_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // OTel names must be ASCII alphanumerics, '_', '.', '-' & '/'. Drop anything else, and map
    // '/' to '.'.
    let stem: String = request
        .uri()
        .path()
        .chars()
        .filter_map(|c| match c {
            '/' => Some('.'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        })
        .collect();

    let name = format!("http.{}{}", request.method().as_str().to_lowercase(), stem);
    let counter = opentelemetry::global::meter("claroz").u64_counter(name).build();
    counter.add(1, &[]);
    next.run(request).await
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Claroz>>) -> axum::response::Response {
    match prometheus::TextEncoder::new().encode_to_string(&state.registry.gather()) {
        Ok(text) => text.into_response(),
        Err(err) => {
            error!("Failed to encode metrics: {err:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Counter for generating request IDs; a u64 is plenty, easier to read than a UUID, and doubles as
/// a rough gauge of uptime.
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

fn make_cors_layer(cfg: &CorsConfig) -> Result<CorsLayer> {
    let origin = cfg
        .allowed_origin
        .parse::<HeaderValue>()
        .context(CorsOriginSnafu {
            origin: cfg.allowed_origin.clone(),
        })?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::POST,
            Method::OPTIONS,
            Method::GET,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// Make the [Router] for the claroz server
fn make_world_router(state: Arc<Claroz>, cfg: &ConfigV1) -> Result<Router> {
    // Incoming requests should hit `SetRequestIdLayer` first, so it's applied last:
    //
    //                 requests
    //                    |
    //                    v
    // +---------  SetRequestIdLayer      ---------+
    // | +-------      CORS layer         -------+ |
    // | | +-----      OTEL layer         -----+ | |
    // | | | +---      TraceLayer         ---+ | | |
    // | | | | +- PropagateRequestIdLayer -+ | | | |
    // | | | | |        handler            | | | | |
    // | | | | +- PropagateRequestIdLayer -+ | | | |
    // | | | +---      TraceLayer         ---+ | | |
    // | | +-----      OTEL layer         -----+ | |
    // | +-------      CORS layer         -------+ |
    // +---------   SetRequestIdLayer     ---------+
    //                    |
    //                    v
    //                responses
    Ok(Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest_service(
            &cfg.storage.url_prefix,
            ServeDir::new(&cfg.storage.local_path),
        )
        .nest(
            "/api/v1",
            make_api_router(state.clone(), cfg.federation.enabled),
        )
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(axum::middleware::from_fn(otel_middleware))
        .layer(make_cors_layer(&cfg.cors)?)
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state))
}

/// Select the storage backend named in configuration
///
/// The in-memory store is created once by our caller & handed back on each reload, so that a
/// SIGHUP doesn't wipe it.
async fn select_storage(
    config: &DatabaseConfig,
    memory: &Arc<InMemory>,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config.provider {
        DatabaseProvider::Postgres => Ok(Arc::new(
            Postgres::new(&config.postgres)
                .await
                .context(PostgresSnafu)?,
        )),
        DatabaseProvider::Memory => Ok(memory.clone()),
    }
}

/// Serve claroz API requests
#[tracing::instrument(skip(opts, cfg, registry))]
async fn serve(opts: CliOpts, mut cfg: ConfigV1, registry: prometheus::Registry) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu { signal: "SIGHUP" })?;
    let mut sigterm =
        signal(SignalKind::terminate()).context(SignalSnafu { signal: "SIGTERM" })?;

    let memory = Arc::new(InMemory::new());

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        // Re-build our connections each pass, in case configuration values have changed:
        let storage = select_storage(&cfg.database, &memory).await?;
        let uploads = Arc::new(LocalFileStorage::new(&cfg.storage).context(UploadsSnafu)?);
        let resolver = Arc::new(
            atproto::Client::new(
                &cfg.federation.pds_host,
                &cfg.user_agent,
                std::time::Duration::from_secs(cfg.federation.timeout),
            )
            .context(AtProtoSnafu)?,
        );
        if !cfg.federation.enabled {
            info!("Federation is disabled; the /federation routes will not be mounted.");
        }

        let state = Arc::new(Claroz {
            storage,
            uploads,
            resolver,
            registry: registry.clone(),
            pepper: cfg.pepper.clone(),
            signing_keys: cfg.signing_keys.signing_keys.clone(),
            token_lifetime: Duration::seconds(cfg.signing_keys.token_lifetime),
            issuer: cfg.signing_keys.issuer.clone(),
        });

        let nfy = Arc::new(Notify::new());
        let server = axum::serve(
            TcpListener::bind(cfg.public_address)
                .await
                .context(BindSnafu {
                    addr: cfg.public_address,
                })?,
            make_world_router(state, &cfg)?,
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));
        info!("Listening on {}", cfg.public_address);

        let mut server = server.into_future();

        fn log_on_err<T, E>(x: StdResult<T, E>)
        where
            E: std::error::Error + std::fmt::Debug,
        {
            if let Err(err) = x {
                error!("{:?}", err);
            }
        }

        tokio::select! {
            res = &mut server => {
                // The server shouldn't exit on its own
                error!("The server exited unexpectedly with {:?}; shutting-down.", res);
                break;
            },
            _ = sighup.recv() => {
                info!("Received SIGHUP; closing connections to re-read configuration.");
                nfy.notify_one();
                log_on_err(server.await);
                // Keep the last good configuration if the new one won't parse
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!("Failed to re-read configuration ({err}); keeping the old one.");
                        cfg
                    }
                };
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                nfy.notify_one();
                log_on_err(server.await);
                break;
            }
        }
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Initialize telemetry
///
/// Must be invoked before any instruments are accessed. Returns the Prometheus registry backing
/// the `/metrics` endpoint.
fn init_telemetry() -> Result<prometheus::Registry> {
    check_metric_names();
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context(ExporterSnafu)?;

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "claroz"))
                .build(),
        )
        .with_reader(exporter)
        .build();
    global::set_meter_provider(provider);

    Ok(registry)
}

async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    // Failure to parse at this point is fatal; on reload, `serve()` falls back to the last
    // known-good configuration instead.
    fn go_async1(
        opts: &CliOpts,
    ) -> Result<(ConfigV1, Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
        let cfg = parse_config(&opts.cfg)?;
        let (formatter, filter) = configure_logging(&opts.log_opts)?;
        Ok((cfg, formatter, filter))
    }

    match go_async1(&opts) {
        Ok((cfg, formatter, filter)) => {
            // Can only be done once
            tracing::subscriber::set_global_default(
                Registry::default().with(formatter).with(filter),
            )
            .context(SubscriberSnafu)?;
            drop(bootstrap_logging_guard);

            info!("claroz version {} starting.", crate_version!());

            let registry = init_telemetry()?;
            serve(opts, cfg, registry).await
        }
        Err(err) => {
            error!("While configuring logging: {err:?}");
            Err(err)
        }
    }
}

fn main() -> Result<()> {
    let opts = CliOpts::new(
        Command::new("clarozd")
            .version(crate_version!())
            .author(crate_authors!())
            .about("A small social network that can reach into the AT Protocol")
            .long_about(
                "`clarozd` serves the claroz API: accounts, image posts, comments, likes & \
                 follows, along with lookup & mirroring of AT Protocol profiles.",
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("CLAROZ_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                       configuration file",
                    ),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CLAROZ_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CLAROZ_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CLAROZ_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("CLAROZ_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    // Until configuration is read, log to stderr through a temporary subscriber (see
    // <https://github.com/tokio-rs/tracing/issues/2903>).
    let bootstrap_subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ConfigV1::default();
        assert_eq!(8080, cfg.public_address.port());
        assert_eq!(DatabaseProvider::Postgres, cfg.database.provider);
        assert!(cfg.federation.enabled);
        assert_eq!("https://bsky.social/", cfg.federation.pds_host.as_str());
        assert_eq!(24 * 60 * 60, cfg.signing_keys.token_lifetime);
    }

    #[test]
    fn parse_v1() {
        let cfg = match toml::from_str::<Configuration>(
            r#"
version = "1"
public-address = "127.0.0.1:9090"
user-agent = "claroz-test"

[database]
provider = "memory"

[federation]
enabled = false
timeout = 5

[storage]
local-path = "/var/lib/claroz/uploads"
"#,
        )
        .unwrap()
        {
            Configuration::V1(cfg) => cfg,
        };
        assert_eq!(9090, cfg.public_address.port());
        assert_eq!(DatabaseProvider::Memory, cfg.database.provider);
        assert_eq!("localhost", cfg.database.postgres.host);
        assert!(!cfg.federation.enabled);
        assert_eq!(5, cfg.federation.timeout);
        assert_eq!(
            PathBuf::from("/var/lib/claroz/uploads"),
            cfg.storage.local_path
        );
        assert_eq!("/uploads", cfg.storage.url_prefix);
        assert_eq!("claroz", cfg.signing_keys.issuer);
    }

    #[test]
    fn cors() {
        assert!(make_cors_layer(&CorsConfig::default()).is_ok());
        assert!(make_cors_layer(&CorsConfig {
            allowed_origin: "bad\norigin".to_owned()
        })
        .is_err());
    }
}
