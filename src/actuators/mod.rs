// Actuator control for the platform legs
//
// Provides:
// - The servo driver abstraction and a PCA9685 PWM implementation
// - Closed-loop linear actuator control on a background thread

mod linear;
pub mod servo;

pub use linear::LinearActuators;
pub use servo::{Pca9685Servos, ServoDriver};
