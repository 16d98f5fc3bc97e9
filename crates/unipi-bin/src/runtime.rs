// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Daemon wiring and lifecycle.
//!
//! Builds the immutable pieces (registry, cache, transports) from the
//! configuration, spawns one scan loop per transport, one controller per
//! cover and the MQTT plane, then waits for a shutdown signal or a fatal
//! MQTT error.
//!
//! Graceful stop: all tasks receive the shutdown broadcast; cover
//! controllers de-energize their relays and persist positions, scan loops
//! flush the command queues within a 2 s budget, the publisher writes a
//! retained `offline`. Anything still running 5 s later is aborted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use unipi_config::{Config, ConfigLoader, ModbusSerialConfig};
use unipi_core::cache::RegisterCache;
use unipi_core::command::{CommandQueue, CommandSender};
use unipi_core::error::{ConfigError, Error, MqttError};
use unipi_core::event::{self, EventSender};
use unipi_core::features::FeatureRegistry;
use unipi_core::types::{TransportId, Unit};
use unipi_covers::{Cover, CoverController, PositionStore, RelayBinding};
use unipi_modbus::{
    ModbusRtuTransport, ModbusTcpTransport, ModbusTransport, PollerSettings, RtuTransportConfig,
    ScanLoop, TcpTransportConfig,
};
use unipi_mqtt::{
    CoverMeta, CoverRoute, DiscoveryEmitter, MqttConnection, MqttSettings, PublisherChannels,
    StatePublisher, TopicRoot, TopicRouter,
};

use crate::shutdown::ShutdownCoordinator;

/// Hard abort budget after shutdown is initiated.
const HARD_ABORT: Duration = Duration::from_secs(5);

// =============================================================================
// run
// =============================================================================

/// Runs the daemon until shutdown or a fatal error.
pub async fn run(loader: ConfigLoader, config: Config) -> Result<(), Error> {
    let cache = Arc::new(RegisterCache::new());
    let mut registry = FeatureRegistry::new();
    let shutdown = ShutdownCoordinator::new();

    let (feature_events, feature_rx) = event::channel(256);
    let (transport_status_tx, transport_status_rx) = mpsc::unbounded_channel();
    let (cover_status_tx, cover_status_rx) = mpsc::unbounded_channel();
    let (connected_tx, connected_rx) = mpsc::unbounded_channel();

    let mut command_senders: HashMap<TransportId, CommandSender> = HashMap::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // -------------------------------------------------------------------------
    // Neuron TCP transport
    // -------------------------------------------------------------------------

    let tcp_id = TransportId::new("tcp");
    let neuron_definition = loader.load_definition(&config.modbus_tcp.device)?;
    let tcp_unit =
        unipi_config::build_unit(&tcp_id, config.modbus_tcp.unit, &neuron_definition)?;
    unipi_config::build_features(
        &tcp_id,
        config.modbus_tcp.unit,
        &neuron_definition,
        &config,
        &mut registry,
    )?;

    let mut tcp_settings = PollerSettings::tcp();
    if let Some(interval) = config.modbus_tcp.scan_interval {
        tcp_settings = tcp_settings.with_scan_interval(Duration::from_secs_f64(interval));
    }

    let tcp_transport = Box::new(ModbusTcpTransport::new(TcpTransportConfig::new(
        tcp_id.as_str(),
        config.modbus_tcp.host.clone(),
        config.modbus_tcp.port,
    )));

    let mut transports: Vec<(Box<dyn ModbusTransport>, Vec<Unit>, PollerSettings)> =
        vec![(tcp_transport, vec![tcp_unit], tcp_settings)];

    // -------------------------------------------------------------------------
    // Serial RTU transports (one per physical port; a bus may carry
    // several units)
    // -------------------------------------------------------------------------

    let mut ports: Vec<(&str, Vec<&ModbusSerialConfig>)> = Vec::new();
    for serial in &config.modbus_serial {
        match ports.iter_mut().find(|(port, _)| *port == serial.port) {
            Some((_, group)) => group.push(serial),
            None => ports.push((serial.port.as_str(), vec![serial])),
        }
    }

    for (index, (port, group)) in ports.iter().enumerate() {
        let transport_id = TransportId::new(format!("serial-{}", index + 1));
        let first = group[0];

        let mut rtu_config = RtuTransportConfig::new(transport_id.as_str(), *port);
        rtu_config.baud_rate = first.baud_rate;
        rtu_config.parity = first.parity;
        rtu_config.stop_bits = first.stop_bits;

        let mut settings = PollerSettings::serial();
        if let Some(interval) = group.iter().filter_map(|s| s.scan_interval).reduce(f64::min) {
            settings = settings.with_scan_interval(Duration::from_secs_f64(interval));
        }

        let mut units = Vec::new();
        for serial in group {
            let definition = loader.load_definition(&serial.device)?;
            units.push(unipi_config::build_unit(
                &transport_id,
                serial.unit,
                &definition,
            )?);
            unipi_config::build_features(
                &transport_id,
                serial.unit,
                &definition,
                &config,
                &mut registry,
            )?;
        }

        let mut transport = ModbusRtuTransport::new(rtu_config);
        // A serial port that cannot be opened is a hardware error, fatal at
        // startup (unlike TCP, which retries: the network may come up later).
        transport.connect().await?;

        transports.push((Box::new(transport), units, settings));
    }

    let registry = Arc::new(registry);

    // -------------------------------------------------------------------------
    // Scan loops
    // -------------------------------------------------------------------------

    for (transport, units, settings) in transports {
        let (command_tx, command_queue) = CommandQueue::channel(settings.command_timeout());
        command_senders.insert(transport.id().clone(), command_tx);

        let events: EventSender = feature_events.fork();
        let scan_loop = ScanLoop::new(
            transport,
            units,
            Arc::clone(&cache),
            Arc::clone(&registry),
            events,
            command_queue,
            transport_status_tx.clone(),
            settings,
        );
        tasks.push(tokio::spawn(scan_loop.run(shutdown.subscribe())));
    }
    drop(feature_events);

    // -------------------------------------------------------------------------
    // Cover controllers
    // -------------------------------------------------------------------------

    let store = PositionStore::new(config.tmp_dir(), config.calibration_enabled()).map_err(
        |source| ConfigError::Io {
            path: config.tmp_dir(),
            source,
        },
    )?;

    let mut cover_routes = Vec::new();
    let mut cover_metas = Vec::new();
    let mut cover_circuits = HashSet::new();

    for cover_config in &config.covers {
        let up = registry
            .by_output_circuit(&cover_config.cover_up)
            .ok_or_else(|| ConfigError::unknown_circuit(&cover_config.cover_up))?;
        let down = registry
            .by_output_circuit(&cover_config.cover_down)
            .ok_or_else(|| ConfigError::unknown_circuit(&cover_config.cover_down))?;

        let up_sender = command_senders
            .get(&up.transport)
            .ok_or_else(|| ConfigError::unknown_circuit(&cover_config.cover_up))?;
        let down_sender = command_senders
            .get(&down.transport)
            .ok_or_else(|| ConfigError::unknown_circuit(&cover_config.cover_down))?;

        cover_circuits.insert(up.id.clone());
        cover_circuits.insert(down.id.clone());

        let cover = Cover::new(
            cover_config.id.clone(),
            cover_config.device_class,
            cover_config.run_time(),
            cover_config.tilt_time(),
        );

        let (controller, mailbox) = CoverController::new(
            cover,
            RelayBinding::new(Arc::clone(up), up_sender.clone()),
            RelayBinding::new(Arc::clone(down), down_sender.clone()),
            Arc::clone(&cache),
            store.clone(),
            cover_status_tx.clone(),
        );

        cover_routes.push(CoverRoute {
            id: cover_config.id.clone(),
            device_class: cover_config.device_class,
            mailbox,
        });
        cover_metas.push(CoverMeta {
            id: cover_config.id.clone(),
            friendly_name: cover_config.friendly_name.clone(),
            device_class: cover_config.device_class,
            suggested_area: cover_config.suggested_area.clone(),
        });

        tasks.push(tokio::spawn(controller.run(shutdown.subscribe())));
    }

    // -------------------------------------------------------------------------
    // MQTT plane
    // -------------------------------------------------------------------------

    let topics = TopicRoot::new(&config.device_name);
    let router = Arc::new(TopicRouter::new(
        &topics,
        Arc::clone(&registry),
        command_senders,
        cover_routes,
    ));

    let mqtt_settings = MqttSettings {
        client_id: config.device_name.clone(),
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        keepalive: Duration::from_secs(config.mqtt.keepalive),
        credentials: config
            .mqtt
            .username
            .clone()
            .zip(config.mqtt.password.clone()),
        availability_topic: topics.availability(),
        reconnect_interval: config.mqtt.reconnect_interval(),
        retry_limit: config.mqtt.retry_limit,
    };

    let (connection, handle) = MqttConnection::new(mqtt_settings, router, connected_tx);
    let mut mqtt_task = tokio::spawn(connection.run(shutdown.subscribe()));

    let discovery = config.homeassistant.enabled.then(|| {
        let model = config
            .homeassistant
            .device
            .model
            .clone()
            .unwrap_or_else(|| neuron_definition.model.clone());
        DiscoveryEmitter::new(
            config.homeassistant.discovery_prefix.clone(),
            topics.clone(),
            config.device_name.clone(),
            config.homeassistant.device.manufacturer.clone(),
            model,
        )
    });

    let publisher = StatePublisher::new(
        handle.clone(),
        topics,
        Arc::clone(&registry),
        Arc::clone(&cache),
        discovery,
        cover_metas,
        cover_circuits,
        PublisherChannels {
            features: feature_rx,
            covers: cover_status_rx,
            transports: transport_status_rx,
            connected: connected_rx,
        },
    );
    tasks.push(tokio::spawn(publisher.run(shutdown.subscribe())));

    tracing::info!(
        features = registry.len(),
        covers = config.covers.len(),
        "Unipi Control started"
    );

    // -------------------------------------------------------------------------
    // Wait for shutdown or a fatal MQTT error
    // -------------------------------------------------------------------------

    let mut mqtt_finished = false;
    let result = tokio::select! {
        _ = shutdown.wait_for_signals() => Ok(()),
        result = &mut mqtt_task => {
            mqtt_finished = true;
            shutdown.initiate_shutdown();
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(Error::Mqtt(error)),
                Err(join_error) => Err(Error::Mqtt(MqttError::request(join_error.to_string()))),
            }
        }
    };

    graceful_join(tasks).await;
    if !mqtt_finished {
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut mqtt_task).await;
    }
    let _ = handle.disconnect().await;

    tracing::info!("Unipi Control stopped");
    result
}

/// Waits for all tasks to finish, aborting stragglers after the hard-abort
/// budget.
async fn graceful_join(tasks: Vec<JoinHandle<()>>) {
    let deadline = tokio::time::Instant::now() + HARD_ABORT;
    for mut task in tasks {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            tracing::warn!("Task did not stop in time, aborting");
            task.abort();
        }
    }
}
