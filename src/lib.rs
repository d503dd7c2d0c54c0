pub mod adapter;
pub mod aliases;
pub mod dvh;
pub mod evaluate;
pub mod integration;
pub mod protocol;
pub mod scorecard;
pub mod similarity;
pub mod source;
pub mod types;
