pub mod channels;
pub mod config;
pub mod datalog_writer;
pub mod datalogger;
pub mod error;
pub mod options;
pub mod prelude;
pub mod report;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::datalog_writer::DatalogWriter;
use crate::datalogger::packet::SerialField;
use crate::datalogger::session::Session;
use crate::datalogger::transport::{Dialer, SocketOptions, Transport};
use crate::prelude::*;
use crate::report::ReportWriter;

/// Log lines look like `[2024-01-01T12:00:00.000 INFO module] message`.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        // already initialised, e.g. by an earlier config error
        debug!("logger already set up: {}", e);
    }
}

/// Runs one session (client or server, depending on whether a host is
/// configured) until it fails or `shutdown_rx` fires, feeding the report
/// and datalog writers along the way.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: Config) -> Result<()> {
    info!("inverter-collector {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();

    // sinks subscribe before the session can publish anything
    let report = ReportWriter::new(config.output_file(), &channels)?;
    let datalog = match config.datalog_file() {
        Some(path) => Some(DatalogWriter::new(path, &channels)?),
        None => None,
    };

    let mut sink_handles = vec![tokio::spawn(async move {
        if let Err(e) = report.start().await {
            error!("report writer failed: {}", e);
        }
    })];
    if let Some(datalog) = datalog {
        sink_handles.push(tokio::spawn(async move {
            if let Err(e) = datalog.start().await {
                error!("datalog writer failed: {}", e);
            }
        }));
    }

    let serial_field = if config.inverter_serial() {
        SerialField::Copy
    } else {
        SerialField::Skip
    };
    let transport = Transport::new(SocketOptions::default());

    let result = match config.host() {
        Some(host) => {
            let dialer = Dialer::new(transport, host, config.port(), config.transport());
            Session::client(
                dialer,
                config.serial(),
                config.poll_delay(),
                channels.clone(),
                shutdown_rx,
            )
            .with_serial_field(serial_field)
            .run()
            .await
        }
        None => match transport.listen(config.port()).await {
            Ok(listener) => {
                Session::server(listener, channels.clone(), shutdown_rx)
                    .with_serial_field(serial_field)
                    .run()
                    .await
            }
            Err(e) => Err(e),
        },
    };

    info!("stopping writers");
    let _ = channels.from_inverter.send(ChannelData::Shutdown);
    for handle in sink_handles {
        if let Err(e) = handle.await {
            error!("Error waiting for writer task: {}", e);
        }
    }

    result?;
    info!("inverter-collector shutdown complete");
    Ok(())
}
