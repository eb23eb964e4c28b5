mod batch;
mod common;
mod router;
