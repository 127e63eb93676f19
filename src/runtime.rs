// 50 Hz relay loop between zenoh clients and the platform
// A "set" only starts the motion; the loop keeps publishing health while the
// legs move and answers once the pose is reached or the timeout expires.
// Further requests queue up behind it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::actuators::ServoDriver;
use crate::config::{LOOP_HZ, POSE_TIMEOUT, TOPIC_CMD_POSE, TOPIC_HEALTH, TOPIC_STATE_POSE};
use crate::lock;
use crate::messages::{PoseReply, PoseRequest, RuntimeHealth};
use crate::platform::{DynStewartPlatform, StewartPlatform};
use crate::sensors::RawSensor;

/// What a request turned into once handed to the platform
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Answered right away
    Reply(PoseReply),
    /// The platform is moving; poll with [`settle`]
    Moving,
}

/// Start handling one request. Never waits for the legs.
pub fn respond<S, D, A>(platform: &mut StewartPlatform<S, D, A>, request: &PoseRequest) -> Response
where
    S: RawSensor + 'static,
    D: ServoDriver + 'static,
    A: RawSensor,
{
    let reply = match request {
        PoseRequest::Get => match platform.get_end_effector_pose() {
            Ok(pose) => PoseReply::Pose(pose),
            Err(e) => {
                warn!("Failed to read end-effector pose: {}", e);
                PoseReply::Nack
            }
        },
        PoseRequest::Set(pose) => match platform.set_end_effector_pose(pose) {
            Ok(true) => return Response::Moving,
            Ok(false) => {
                info!("Pose {:?} is outside the reachable workspace", pose);
                PoseReply::Nack
            }
            Err(e) => {
                warn!("Rejected pose {:?}: {}", pose, e);
                PoseReply::Nack
            }
        },
        PoseRequest::Exit => match platform.stop() {
            Ok(()) => PoseReply::Ack,
            Err(e) => {
                error!("Failed to stop platform: {}", e);
                PoseReply::Nack
            }
        },
    };
    Response::Reply(reply)
}

/// Outcome of a started motion, or `None` while the legs are still moving
pub fn settle<S, D, A>(platform: &StewartPlatform<S, D, A>) -> Option<PoseReply>
where
    S: RawSensor + 'static,
    D: ServoDriver + 'static,
    A: RawSensor,
{
    if platform.is_moving() {
        return None;
    }
    if platform.wait_till_end_effector_pose_is_reached(Duration::ZERO) {
        Some(PoseReply::Ack)
    } else {
        Some(PoseReply::Nack)
    }
}

pub struct Runtime {
    platform: Arc<Mutex<DynStewartPlatform>>,
    timeout: Duration,
    // Deadline of the "set" still waiting for an answer
    pending: Option<Instant>,
    failed: bool,
}

impl Runtime {
    pub fn new(platform: DynStewartPlatform, timeout: Duration) -> Self {
        Self {
            platform: Arc::new(Mutex::new(platform)),
            timeout,
            pending: None,
            failed: false,
        }
    }

    /// Whether a "set" is still waiting for its answer
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand one request to the platform off the async executor.
    ///
    /// Returns the reply, or `None` if the answer comes later from
    /// [`Runtime::poll_pending`].
    async fn on_request(
        &mut self,
        request: PoseRequest,
    ) -> Result<Option<PoseReply>, tokio::task::JoinError> {
        info!("Received request: {:?}", request);
        let platform = Arc::clone(&self.platform);
        let response = tokio::task::spawn_blocking(move || {
            let mut platform = lock(&platform);
            respond(&mut *platform, &request)
        })
        .await?;

        Ok(match response {
            Response::Reply(reply) => {
                self.record(&reply);
                Some(reply)
            }
            Response::Moving => {
                self.pending = Some(Instant::now() + self.timeout);
                None
            }
        })
    }

    /// Answer for the pending "set" once it settles or times out
    fn poll_pending(&mut self) -> Option<PoseReply> {
        let deadline = self.pending?;
        let reply = match settle(&*lock(&self.platform)) {
            Some(reply) => reply,
            None if Instant::now() >= deadline => {
                warn!("Pose not reached within {:?}", self.timeout);
                PoseReply::Nack
            }
            None => return None,
        };
        self.pending = None;
        self.record(&reply);
        Some(reply)
    }

    // A failed request is reported until the next one succeeds
    fn record(&mut self, reply: &PoseReply) {
        self.failed = *reply == PoseReply::Nack;
    }

    fn update_health(&self) -> RuntimeHealth {
        if lock(&self.platform).is_moving() {
            RuntimeHealth::Moving
        } else if self.failed {
            RuntimeHealth::Fault
        } else {
            RuntimeHealth::Idle
        }
    }
}

pub async fn run(platform: DynStewartPlatform) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_POSE).await?;
    let pub_pose = session.declare_publisher(TOPIC_STATE_POSE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(platform, POSE_TIMEOUT);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop, {:?} pose timeout", LOOP_HZ, POSE_TIMEOUT);
    info!("Subscribed to: {}", TOPIC_CMD_POSE);
    info!("Publishing to: {}, {}", TOPIC_STATE_POSE, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Answer a "set" that has settled
        if let Some(reply) = runtime.poll_pending() {
            pub_pose.put(reply.to_string()).await?;
        }

        // 2. Handle queued requests in arrival order, holding back behind a moving "set"
        while !runtime.is_busy() {
            let Ok(Some(sample)) = subscriber.try_recv() else {
                break;
            };
            let payload = sample.payload().to_bytes();
            let text = String::from_utf8_lossy(&payload);
            match PoseRequest::parse(&text) {
                Ok(PoseRequest::Exit) => {
                    if let Some(reply) = runtime.on_request(PoseRequest::Exit).await? {
                        pub_pose.put(reply.to_string()).await?;
                    }
                    info!("Exit requested, shutting down");
                    return Ok(());
                }
                Ok(request) => {
                    if let Some(reply) = runtime.on_request(request).await? {
                        pub_pose.put(reply.to_string()).await?;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    pub_pose.put(PoseReply::Nack.to_string()).await?;
                }
            }
        }

        // 3. Publish health
        let health_json = serde_json::to_string(&runtime.update_health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;
    use crate::kinematics::Pose;
    use crate::sim::SimulatedRig;
    use std::thread;

    /// Poll until the started motion settles
    fn settled<S, D, A>(platform: &StewartPlatform<S, D, A>) -> PoseReply
    where
        S: RawSensor + 'static,
        D: ServoDriver + 'static,
        A: RawSensor,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(reply) = settle(platform) {
                return reply;
            }
            assert!(Instant::now() < deadline, "motion did not settle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let (_rig, mut platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();

        let target = Pose::new(0.0, 0.0, 0.23, 0.0, 0.0, 0.0);
        assert_eq!(respond(&mut platform, &PoseRequest::Set(target)), Response::Moving);
        assert_eq!(settled(&platform), PoseReply::Ack);

        match respond(&mut platform, &PoseRequest::Get) {
            Response::Reply(PoseReply::Pose(pose)) => {
                assert!((pose.z - 0.23).abs() < 0.01, "z = {}", pose.z)
            }
            other => panic!("expected a pose, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_pose_is_nacked() {
        let (_rig, mut platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let response = respond(
            &mut platform,
            &PoseRequest::Set(Pose::new(0.0, 0.0, f64::INFINITY, 0.0, 0.0, 0.0)),
        );
        assert_eq!(response, Response::Reply(PoseReply::Nack));
    }

    #[test]
    fn test_exit_stops_platform() {
        let (rig, mut platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let response = respond(&mut platform, &PoseRequest::Exit);
        assert_eq!(response, Response::Reply(PoseReply::Ack));
        assert_eq!(rig.commands().last().unwrap().speeds, vec![0.0; 6]);
    }

    #[test]
    fn test_exit_during_motion_settles_as_nack() {
        let (_rig, mut platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let target = Pose::new(0.0, 0.0, 0.26, 0.0, 0.0, 0.0);
        assert_eq!(respond(&mut platform, &PoseRequest::Set(target)), Response::Moving);

        respond(&mut platform, &PoseRequest::Exit);
        assert_eq!(settle(&platform), Some(PoseReply::Nack));
    }

    #[tokio::test]
    async fn test_health_reports_moving_until_set_is_answered() {
        let (_rig, platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let mut runtime = Runtime::new(platform, Duration::from_secs(10));
        assert_eq!(runtime.update_health(), RuntimeHealth::Idle);

        // Legs start mid-range, so this takes several control periods
        let target = Pose::new(0.0, 0.0, 0.26, 0.0, 0.0, 0.0);
        assert_eq!(runtime.on_request(PoseRequest::Set(target)).await.unwrap(), None);
        assert!(runtime.is_busy());
        assert_eq!(runtime.update_health(), RuntimeHealth::Moving);

        let reply = loop {
            if let Some(reply) = runtime.poll_pending() {
                break reply;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(reply, PoseReply::Ack);
        assert!(!runtime.is_busy());
        assert_eq!(runtime.update_health(), RuntimeHealth::Idle);
    }

    #[tokio::test]
    async fn test_timed_out_set_is_nacked_while_still_moving() {
        let (_rig, platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let mut runtime = Runtime::new(platform, Duration::ZERO);

        let target = Pose::new(0.0, 0.0, 0.26, 0.0, 0.0, 0.0);
        assert_eq!(runtime.on_request(PoseRequest::Set(target)).await.unwrap(), None);
        assert_eq!(runtime.poll_pending(), Some(PoseReply::Nack));
        assert_eq!(runtime.update_health(), RuntimeHealth::Moving);

        lock(&runtime.platform).stop().unwrap();
        assert_eq!(runtime.update_health(), RuntimeHealth::Fault);
    }

    #[tokio::test]
    async fn test_fault_clears_after_successful_request() {
        let (_rig, platform) = SimulatedRig::platform(&PlatformConfig::default()).unwrap();
        let mut runtime = Runtime::new(platform, Duration::from_secs(10));

        let reply = runtime
            .on_request(PoseRequest::Set(Pose::new(0.0, 0.0, f64::NAN, 0.0, 0.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(reply, Some(PoseReply::Nack));
        assert_eq!(runtime.update_health(), RuntimeHealth::Fault);

        let reply = runtime.on_request(PoseRequest::Get).await.unwrap();
        assert!(matches!(reply, Some(PoseReply::Pose(_))));
        assert_eq!(runtime.update_health(), RuntimeHealth::Idle);
    }
}
