//! The motion-planner boundary.
//!
//! The runtime never talks to a robot directly. Everything physical goes
//! through the [`MotionPlanner`] trait: batched motion dispatch, pose and
//! device I/O, stop requests, and timing. [`SimulatedPlanner`] is the
//! in-process implementation backing tests and the CLI.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::interpreter::pose::Pose;
use crate::interpreter::value::Value;
use crate::runtime::error::PlannerError;
use crate::runtime::queue::Action;

/// External planner and device backend.
///
/// `dispatch` receives a whole drained batch as one trajectory and resolves
/// when the batch has finished executing, returning the final pose. How a
/// [`stop`](MotionPlanner::stop) request interacts with an in-flight batch
/// (abort between actions or mid-action) is the implementation's policy.
#[async_trait]
pub trait MotionPlanner: Send + Sync {
    /// Execute a batch of motions on a controller, returning the final pose.
    async fn dispatch(&self, controller: &str, actions: &[Action]) -> Result<Pose, PlannerError>;

    /// Current pose of a controller's flange.
    async fn read_pose(&self, controller: &str) -> Result<Pose, PlannerError>;

    /// Read a device key.
    async fn read(&self, device: &str, key: &str) -> Result<Value, PlannerError>;

    /// Write a device key.
    async fn write(&self, device: &str, key: &str, value: Value) -> Result<(), PlannerError>;

    /// Invoke a device-side operation.
    async fn device_call(
        &self,
        device: &str,
        key: &str,
        args: Vec<Value>,
    ) -> Result<Value, PlannerError>;

    /// Request that a controller stop its current motion.
    async fn stop(&self, controller: &str) -> Result<(), PlannerError>;

    /// Wait for the given number of milliseconds.
    async fn sleep(&self, milliseconds: u64);
}

/// One recorded `dispatch` call.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    /// Controller the batch was sent to.
    pub controller: String,
    /// The batch.
    pub actions: Vec<Action>,
}

#[derive(Debug, Default)]
struct SimState {
    poses: HashMap<String, Pose>,
    devices: HashMap<(String, String), Value>,
    dispatches: Vec<DispatchRecord>,
    injected_failures: VecDeque<PlannerError>,
    stop_requests: Vec<String>,
    slept_ms: u64,
}

/// In-memory planner: tracks per-controller poses, records every dispatch,
/// serves a key-value device map, and completes sleeps instantly.
///
/// Tests inject failures with [`SimulatedPlanner::inject_failure`]; the next
/// `dispatch` consumes and returns the injected error.
#[derive(Debug)]
pub struct SimulatedPlanner {
    controllers: Vec<String>,
    state: Mutex<SimState>,
}

impl SimulatedPlanner {
    /// Planner knowing the given controllers, all starting at the identity
    /// pose.
    pub fn new<S: AsRef<str>>(controllers: &[S]) -> Self {
        let controllers: Vec<String> =
            controllers.iter().map(|c| c.as_ref().to_string()).collect();
        let mut state = SimState::default();
        for controller in &controllers {
            state.poses.insert(controller.clone(), Pose::identity());
        }
        Self {
            controllers,
            state: Mutex::new(state),
        }
    }

    /// Pre-set a controller pose.
    pub fn set_pose(&self, controller: &str, pose: Pose) {
        self.state.lock().poses.insert(controller.to_string(), pose);
    }

    /// Pre-set a device key.
    pub fn set_device(&self, device: &str, key: &str, value: Value) {
        self.state
            .lock()
            .devices
            .insert((device.to_string(), key.to_string()), value);
    }

    /// Read back a device key, for assertions.
    pub fn device(&self, device: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .devices
            .get(&(device.to_string(), key.to_string()))
            .cloned()
    }

    /// Queue an error to be returned by the next `dispatch`.
    pub fn inject_failure(&self, error: PlannerError) {
        self.state.lock().injected_failures.push_back(error);
    }

    /// Every dispatch so far, in order.
    pub fn dispatch_log(&self) -> Vec<DispatchRecord> {
        self.state.lock().dispatches.clone()
    }

    /// Controllers that received a stop request, in order.
    pub fn stop_log(&self) -> Vec<String> {
        self.state.lock().stop_requests.clone()
    }

    /// Total milliseconds slept.
    pub fn slept_ms(&self) -> u64 {
        self.state.lock().slept_ms
    }

    fn check_controller(&self, controller: &str) -> Result<(), PlannerError> {
        if self.controllers.iter().any(|c| c == controller) {
            Ok(())
        } else {
            Err(PlannerError::UnknownController(controller.to_string()))
        }
    }
}

#[async_trait]
impl MotionPlanner for SimulatedPlanner {
    async fn dispatch(&self, controller: &str, actions: &[Action]) -> Result<Pose, PlannerError> {
        self.check_controller(controller)?;
        let mut state = self.state.lock();
        if let Some(error) = state.injected_failures.pop_front() {
            return Err(error);
        }
        state.dispatches.push(DispatchRecord {
            controller: controller.to_string(),
            actions: actions.to_vec(),
        });
        if let Some(last) = actions.last() {
            state.poses.insert(controller.to_string(), last.target);
        }
        state
            .poses
            .get(controller)
            .copied()
            .ok_or_else(|| PlannerError::UnknownController(controller.to_string()))
    }

    async fn read_pose(&self, controller: &str) -> Result<Pose, PlannerError> {
        self.check_controller(controller)?;
        self.state
            .lock()
            .poses
            .get(controller)
            .copied()
            .ok_or_else(|| PlannerError::UnknownController(controller.to_string()))
    }

    async fn read(&self, device: &str, key: &str) -> Result<Value, PlannerError> {
        self.state
            .lock()
            .devices
            .get(&(device.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PlannerError::Device {
                device: device.to_string(),
                reason: format!("no value for key '{key}'"),
            })
    }

    async fn write(&self, device: &str, key: &str, value: Value) -> Result<(), PlannerError> {
        self.state
            .lock()
            .devices
            .insert((device.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn device_call(
        &self,
        device: &str,
        key: &str,
        args: Vec<Value>,
    ) -> Result<Value, PlannerError> {
        // The simulation models device calls as an echo: the arguments come
        // back as an array, after recording the call under the key.
        let result = Value::Array(args);
        self.state.lock().devices.insert(
            (device.to_string(), format!("last_call:{key}")),
            result.clone(),
        );
        Ok(result)
    }

    async fn stop(&self, controller: &str) -> Result<(), PlannerError> {
        self.check_controller(controller)?;
        self.state.lock().stop_requests.push(controller.to_string());
        Ok(())
    }

    async fn sleep(&self, milliseconds: u64) {
        self.state.lock().slept_ms += milliseconds;
    }
}
