pub mod delivery;
pub mod health;
pub mod message;
pub mod response;
pub mod retry;
pub mod validation;
