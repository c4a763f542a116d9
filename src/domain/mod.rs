// Domain layer - plain data types shared by the core and its adapters
pub mod data_point;
pub mod expression;
pub mod sun_times;
pub mod telemetry;
