pub mod enrollment;
