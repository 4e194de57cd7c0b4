use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use log::{debug, info, warn};
use rosc::{decoder, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::types::Settings;
use crate::device::link::GattLink;
use crate::device::session::DeviceSession;
use crate::device::types::{Channel, PwmOutcome};
use crate::signal::aggregator::{ChannelAverager, PowerCurve};

/// Numeric value of an OSC argument. Avatar parameters arrive as floats, ints or bools.
pub fn arg_value(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(v) => Some(*v),
        OscType::Double(v) => Some(*v as f32),
        OscType::Int(v) => Some(*v as f32),
        OscType::Long(v) => Some(*v as f32),
        OscType::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Routes OSC messages for the two channel addresses to their averagers.
pub struct OscRouter {
    addresses: [String; 2],
    averagers: [ChannelAverager; 2],
}

impl OscRouter {
    pub fn new(settings: &Settings, now: Instant) -> Self {
        let curve = PowerCurve::from_settings(settings);
        let averager = |channel: Channel| ChannelAverager::new(settings.window(), curve, settings.max_power(channel), now);

        OscRouter {
            addresses: Channel::ALL.map(|channel| settings.osc_addr(channel).to_string()),
            averagers: Channel::ALL.map(averager),
        }
    }

    pub fn channel_for(&self, addr: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|channel| self.addresses[channel.index()] == addr)
    }

    /// Feeds every matching message of `packet` (bundles included) and returns the power
    /// requests it produced, in order.
    pub fn route(&mut self, packet: &OscPacket, now: Instant, gate_open: bool) -> Vec<(Channel, i32)> {
        let mut requests = Vec::new();
        self.route_into(packet, now, gate_open, &mut requests);
        requests
    }

    fn route_into(&mut self, packet: &OscPacket, now: Instant, gate_open: bool, requests: &mut Vec<(Channel, i32)>) {
        match packet {
            OscPacket::Bundle(bundle) => {
                for inner in &bundle.content {
                    self.route_into(inner, now, gate_open, requests);
                }
            },
            OscPacket::Message(message) => {
                let Some(channel) = self.channel_for(&message.addr) else {
                    return;
                };
                let Some(value) = message.args.first().and_then(arg_value) else {
                    debug!("Ignoring OSC message without a numeric argument on {}", message.addr);
                    return;
                };

                if let Some(power) = self.averagers[channel.index()].update(value, now, gate_open) {
                    requests.push((channel, power));
                }
            },
        }
    }
}

async fn apply<L: GattLink>(session: &DeviceSession<L>, channel: Channel, power: i32) {
    let result = match channel {
        Channel::A => session.set_pwm(power, -1).await,
        Channel::B => session.set_pwm(-1, power).await,
    };

    match result {
        Ok(PwmOutcome::Written(state)) => debug!("Channel {} power now {}", channel, state.get(channel)),
        Ok(_) => {},
        Err(err) => warn!("Failed to set power of channel {}: {}", channel, err),
    }
}

/// Decodes one received datagram. Receive errors and malformed packets are logged and skipped.
fn decode_datagram(received: io::Result<(usize, SocketAddr)>, buf: &[u8]) -> Option<OscPacket> {
    let (size, from) = match received {
        Ok(received) => received,
        Err(err) => {
            warn!("Failed to receive OSC packet: {}", err);
            return None;
        },
    };

    match decoder::decode_udp(&buf[..size]) {
        Ok((_, packet)) => Some(packet),
        Err(err) => {
            debug!("Dropping malformed OSC packet from {}: {:?}", from, err);
            None
        },
    }
}

/// Receives OSC packets on `socket` and drives the session's power until `cancel` fires.
pub async fn serve<L: GattLink>(
    socket: UdpSocket,
    settings: &Settings,
    session: Arc<DeviceSession<L>>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut router = OscRouter::new(settings, Instant::now());
    let mut buf = [0u8; decoder::MTU];

    info!("Listening for OSC on {}", socket.local_addr()?);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            received = socket.recv_from(&mut buf) => {
                let Some(packet) = decode_datagram(received, &buf) else {
                    continue;
                };

                let requests = router.route(&packet, Instant::now(), session.power_gate().is_open());
                for (channel, power) in requests {
                    apply(&session, channel, power).await;
                }
            },
        }
    }

    info!("OSC server stopped");
    Ok(())
}

pub fn osc_server_task<L: GattLink + 'static>(
    socket: UdpSocket,
    settings: Settings,
    session: Arc<DeviceSession<L>>,
    cancel: CancellationToken,
) -> JoinHandle<io::Result<()>> {
    spawn(async move {
        serve(socket, &settings, session, cancel).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{encoder, OscBundle, OscMessage, OscTime};
    use tokio::time::{sleep, timeout, Duration};

    use crate::device::session::SessionOptions;
    use crate::device::testing::connected_session;
    use crate::device::types::PowerState;

    fn message(addr: &str, value: OscType) -> OscPacket {
        OscPacket::Message(OscMessage { addr: addr.to_string(), args: vec![value] })
    }

    #[test]
    fn numeric_arguments() {
        assert_eq!(arg_value(&OscType::Float(0.25)), Some(0.25));
        assert_eq!(arg_value(&OscType::Double(0.5)), Some(0.5));
        assert_eq!(arg_value(&OscType::Int(1)), Some(1.0));
        assert_eq!(arg_value(&OscType::Bool(true)), Some(1.0));
        assert_eq!(arg_value(&OscType::Bool(false)), Some(0.0));
        assert_eq!(arg_value(&OscType::String("1".to_string())), None);
    }

    #[test]
    fn routes_by_address() {
        let settings = Settings::default();
        let start = Instant::now();
        let mut router = OscRouter::new(&settings, start);

        assert_eq!(router.channel_for("/avatar/parameters/EarLDis"), Some(Channel::A));
        assert_eq!(router.channel_for("/avatar/parameters/EarRDis"), Some(Channel::B));
        assert_eq!(router.channel_for("/avatar/parameters/Other"), None);

        let released = router.route(&message("/avatar/parameters/EarRDis", OscType::Float(0.0)), start, true);
        assert_eq!(released, vec![(Channel::B, 1)]);

        let ignored = router.route(&message("/avatar/parameters/Other", OscType::Float(0.0)), start, true);
        assert!(ignored.is_empty());
    }

    #[test]
    fn bundles_are_unpacked() {
        let settings = Settings::default();
        let start = Instant::now();
        let mut router = OscRouter::new(&settings, start);

        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime { seconds: 0, fractional: 1 },
            content: vec![
                message("/avatar/parameters/EarLDis", OscType::Float(0.0)),
                OscPacket::Bundle(OscBundle {
                    timetag: OscTime { seconds: 0, fractional: 1 },
                    content: vec![message("/avatar/parameters/EarRDis", OscType::Bool(false))],
                }),
            ],
        });

        assert_eq!(router.route(&bundle, start, true), vec![(Channel::A, 1), (Channel::B, 1)]);
    }

    #[test]
    fn receive_errors_are_skipped() {
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(decode_datagram(Err(reset), &[]).is_none());

        assert!(decode_datagram(Ok((3, from)), &[1, 2, 3]).is_none());

        let packet = message("/avatar/parameters/EarLDis", OscType::Float(0.5));
        let encoded = encoder::encode(&packet).unwrap();
        assert_eq!(decode_datagram(Ok((encoded.len(), from)), &encoded), Some(packet));
    }

    #[tokio::test]
    async fn udp_messages_drive_the_session() {
        let mut settings = Settings::default();
        settings.window_secs = 0.0;

        let session = Arc::new(connected_session(SessionOptions::default()).await);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = osc_server_task(socket, settings.clone(), session.clone(), cancel.clone());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = encoder::encode(&message("/avatar/parameters/EarLDis", OscType::Float(1.0))).unwrap();

        // the first value only opens the window, the second flushes it
        timeout(Duration::from_secs(5), async {
            while session.power().pow_a != 300 {
                client.send_to(&packet, server_addr).await.unwrap();
                sleep(Duration::from_millis(5)).await;
            }
        }).await.unwrap();

        assert_eq!(session.power(), PowerState { pow_a: 300, pow_b: 0 });

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
