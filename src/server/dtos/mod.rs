pub mod health_dto;
pub mod stream_dto;
