pub mod diagnosis_service;
