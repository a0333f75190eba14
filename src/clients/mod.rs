pub mod health;
pub mod mailer;
pub mod producer;
pub mod rbmq;
pub mod redis;
pub mod renderer;
