//! Robot Client ↔ Follower behaviour over the loopback and WebSocket links.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reach_hal::{SimBody, SimCamera, SimWorld};
use reach_middleware::{
    BusPayload, ClientConfig, ClientLink, Connector, Follower, FollowerConfig, FollowerHandle,
    LinkStatus, Message, RobotClient, Topic, WsConnector, WsServer,
};
use reach_types::{ControlMode, GripperState, Pose2, ReachError, RobotState};
use tokio::sync::{mpsc, watch};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn fast_follower() -> Follower {
    let cfg = FollowerConfig {
        publish_interval: Duration::from_millis(20),
        frame_every: 2,
        ..Default::default()
    };
    let world = Arc::new(SimWorld::demo_room());
    Follower::new(Box::new(SimBody::new().with_world(Arc::clone(&world))), cfg)
        .with_camera(Box::new(SimCamera::new("head", world)))
}

fn client_cfg() -> ClientConfig {
    ClientConfig {
        reconnect_initial: Duration::from_millis(20),
        link_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

async fn loopback() -> Result<(RobotClient, FollowerHandle, watch::Sender<bool>), ReachError> {
    let (handle, shutdown, _task) = fast_follower().spawn();
    let client = RobotClient::connect(Arc::new(handle.connector()), client_cfg()).await?;
    Ok((client, handle, shutdown))
}

#[tokio::test]
async fn move_to_reports_arrival() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let state = client.move_to(Pose2::new(0.3, 0.2, 0.5)).await?;
    assert!(state.at_goal);
    assert!(state.base_pose.distance_to(&Pose2::new(0.3, 0.2, 0.5)) < 0.02);
    assert_eq!(client.link_status(), LinkStatus::Up);
    Ok(())
}

#[tokio::test]
async fn move_by_is_relative_to_current_pose() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    client.move_to(Pose2::new(0.0, 0.0, std::f32::consts::FRAC_PI_2)).await?;
    let state = client.move_by(Pose2::new(0.25, 0.0, 0.0)).await?;
    assert!((state.base_pose.y - 0.25).abs() < 0.02);
    assert!(state.base_pose.x.abs() < 0.02);
    Ok(())
}

#[tokio::test]
async fn stop_preempts_in_flight_move() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let mover = {
        let client = client.clone();
        tokio::spawn(async move { client.move_to(Pose2::new(3.0, 0.0, 0.0)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.stop().await?;

    let result = mover.await?;
    assert!(matches!(result, Err(ReachError::Cancelled { .. })), "{result:?}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let halted = client.get_state().ok_or("no state")?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = client.get_state().ok_or("no state")?;
    assert!(halted.base_pose.x < 1.0);
    assert!((later.base_pose.x - halted.base_pose.x).abs() < 1e-4, "robot kept moving");
    assert!(later.at_goal);
    Ok(())
}

#[tokio::test]
async fn commands_execute_in_issue_order() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let mut last = 0;
    for i in 0..10 {
        let seq = client.dispatch(reach_types::CommandKind::Gripper { position: i as f32 / 10.0 }).await?;
        assert!(seq > last);
        last = seq;
    }
    let state = client.set_gripper(0.95).await?;
    assert!(state.last_executed_seq > last);
    assert!((state.gripper.position - 0.95).abs() < 0.02);
    Ok(())
}

#[tokio::test]
async fn unsafe_command_is_rejected() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let err = client.move_arm(vec![0.5, 2.0, 0.0, 0.0, 0.0]).await.unwrap_err();
    assert!(matches!(err, ReachError::CommandRejected { ref reason, .. } if reason.contains("arm")));
    Ok(())
}

#[tokio::test]
async fn move_to_times_out_without_arrival() -> TestResult {
    let (handle, _shutdown, _task) = fast_follower().spawn();
    let cfg = ClientConfig { move_timeout: Duration::from_millis(200), ..client_cfg() };
    let client = RobotClient::connect(Arc::new(handle.connector()), cfg).await?;
    let err = client.move_to(Pose2::new(2.5, 0.0, 0.0)).await.unwrap_err();
    assert!(matches!(err, ReachError::CommandTimeout { timeout_ms: 200, .. }));
    assert!(err.is_recoverable());
    Ok(())
}

#[tokio::test]
async fn set_mode_waits_for_posture() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let state = client.set_mode(ControlMode::Manipulation).await?;
    assert_eq!(state.control_mode, ControlMode::Manipulation);
    assert!(state.at_goal);
    Ok(())
}

#[tokio::test]
async fn trajectory_passes_every_waypoint() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let path = [
        Pose2::new(0.3, 0.0, 0.0),
        Pose2::new(0.6, 0.3, 0.8),
        Pose2::new(0.6, 0.6, 1.57),
    ];
    let state = client.execute_trajectory(&path).await?;
    assert!(state.base_pose.distance_to(&path[2]) < 0.02);
    Ok(())
}

#[tokio::test]
async fn image_stream_yields_frames_until_shutdown() -> TestResult {
    let (client, _handle, _shutdown) = loopback().await?;
    let mut frames = client.stream_images();
    let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await?
        .ok_or("stream ended early")?;
    let second = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await?
        .ok_or("stream ended early")?;
    assert!(second.seq > first.seq);
    assert_eq!(first.depth.len(), (first.width * first.height) as usize);

    client.shutdown();
    let end = tokio::time::timeout(Duration::from_secs(1), frames.next()).await?;
    assert!(end.is_none());
    Ok(())
}

#[tokio::test]
async fn link_loss_fails_waiters_and_reconnects() -> TestResult {
    let (client, handle, _shutdown) = loopback().await?;
    let mut alerts = client.subscribe(Topic::LinkAlerts);
    let mover = {
        let client = client.clone();
        tokio::spawn(async move { client.move_to(Pose2::new(2.5, 0.0, 0.0)).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.disconnect_all();

    let result = mover.await?;
    assert!(matches!(result, Err(ReachError::LinkDown(_))), "{result:?}");

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(2), alerts.recv()).await??;
        if let BusPayload::Link { status, .. } = event.payload {
            seen.push(status);
        }
    }
    assert_eq!(seen, vec![LinkStatus::Down, LinkStatus::Up]);

    client.stop().await?;
    let state = client.move_by(Pose2::new(0.1, 0.0, 0.0)).await?;
    assert!(state.at_goal);
    Ok(())
}

// ── A link whose follower never acknowledges anything ───────────────────────

struct DeafConnector;

fn idle_state(seq_id: u64) -> RobotState {
    RobotState {
        timestamp: Utc::now(),
        seq_id,
        base_pose: Pose2::default(),
        joint_positions: vec![0.0; 5],
        joint_velocities: vec![0.0; 5],
        gripper: GripperState::default(),
        control_mode: ControlMode::Navigation,
        last_executed_seq: 0,
        at_goal: true,
        battery_percent: 100,
        faults: vec![],
    }
}

#[async_trait]
impl Connector for DeafConnector {
    fn endpoint(&self) -> String {
        "deaf".into()
    }

    async fn connect(&self) -> Result<ClientLink, ReachError> {
        let (telemetry_tx, telemetry) = mpsc::channel(8);
        let (ack_tx, acks) = mpsc::unbounded_channel::<Message>();
        let (commands, mut swallowed) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            let _acks_never_sent = ack_tx;
            let mut seq_id = 0;
            loop {
                tokio::select! {
                    msg = swallowed.recv() => if msg.is_none() { break },
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {
                        seq_id += 1;
                        if telemetry_tx.send(Message::State(idle_state(seq_id))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(ClientLink { telemetry, acks, commands })
    }
}

#[tokio::test]
async fn unacknowledged_stop_escalates_to_link_down() -> TestResult {
    let cfg = ClientConfig { stop_timeout: Duration::from_millis(150), ..client_cfg() };
    let client = RobotClient::connect(Arc::new(DeafConnector), cfg).await?;
    let err = client.stop().await.unwrap_err();
    assert!(err.is_link_down(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn connect_fails_without_telemetry() {
    struct Silent;
    #[async_trait]
    impl Connector for Silent {
        fn endpoint(&self) -> String {
            "silent".into()
        }
        async fn connect(&self) -> Result<ClientLink, ReachError> {
            let (_telemetry_tx, telemetry) = mpsc::channel(1);
            let (_ack_tx, acks) = mpsc::unbounded_channel();
            let (commands, _rx) = mpsc::unbounded_channel();
            // Senders drop here, so the link closes at once.
            Ok(ClientLink { telemetry, acks, commands })
        }
    }
    let cfg = ClientConfig { link_timeout: Duration::from_millis(100), ..client_cfg() };
    let result = RobotClient::connect(Arc::new(Silent), cfg).await;
    assert!(matches!(result, Err(ReachError::LinkDown(_))));
}

// ── WebSocket transport ─────────────────────────────────────────────────────

#[tokio::test]
async fn websocket_link_carries_commands_and_state() -> TestResult {
    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let server = WsServer::bind(any, any).await?;
    let (state_addr, command_addr) = server.local_addrs()?;
    let (handle, shutdown, _task) = fast_follower().spawn();
    tokio::spawn(server.serve(handle, shutdown.subscribe()));

    let connector = WsConnector::new("127.0.0.1", state_addr.port(), command_addr.port());
    let client = RobotClient::connect(Arc::new(connector), client_cfg()).await?;
    let state = client.move_by(Pose2::new(0.2, 0.0, 0.0)).await?;
    assert!((state.base_pose.x - 0.2).abs() < 0.02);

    client.set_fast_mode(true)?;
    client.stop().await?;
    shutdown.send_replace(true);
    Ok(())
}
