pub mod app;
pub mod canvas;
pub mod catalog;
pub mod document;
pub mod geometry;
pub mod graph;
pub mod plan;
pub mod scene;
