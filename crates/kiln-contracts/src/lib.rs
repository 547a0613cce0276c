pub mod capabilities;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod normalized;
pub mod providers;
pub mod request;
pub mod result;
