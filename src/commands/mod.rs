pub mod adapter;
pub mod admit;
pub mod clean;
pub mod definitions;
pub mod links;
pub mod merge;
pub mod pipeline;
pub mod sections;
pub mod status;
