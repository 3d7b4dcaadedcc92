use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::{config::LogConfig, error::Error};

const LOG_FILE_PREFIX: &str = "drive-server.log";

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured directive. The returned guard flushes the log
/// file on drop and must be kept alive for as long as the server runs.
///
/// ```no_run
/// # async fn run() -> Result<(), dd_core::Error> {
/// use dd_core::{logging, DriveServerConfig};
///
/// let config = DriveServerConfig::load("drive-server.toml").await?;
/// let _guard = logging::init(&config.log)?;
/// # Ok(())
/// # }
/// ```
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, Error> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(&config.directive)?,
	};

	let (file_layer, guard) = config.directory.as_ref().map_or((None, None), |directory| {
		let (non_blocking, guard) =
			tracing_appender::non_blocking(rolling::daily(directory, LOG_FILE_PREFIX));

		(
			Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
			Some(guard),
		)
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer())
		.with(file_layer)
		.try_init()?;

	Ok(guard)
}
