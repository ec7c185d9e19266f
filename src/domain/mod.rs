// Domain layer - Samples, descriptors, windows and axis ticks
pub mod descriptor;
pub mod sample;
pub mod ticks;
pub mod window;
