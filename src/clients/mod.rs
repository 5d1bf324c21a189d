pub mod rbmq;
pub mod smtp;
