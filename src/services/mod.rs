pub mod archive_pipeline;
pub mod label_matcher;
pub mod object_copier;
pub mod subscription_manager;
