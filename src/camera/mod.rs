/// Flight Camera Module - Data-Oriented Programming (DOP) style
///
/// - flycam_data.rs: Pure data structures with NO methods
/// - flycam_operations.rs: Pure functions that operate on data

pub mod flycam_data;
pub mod flycam_operations;

pub use flycam_data::FlycamData;

pub use flycam_operations::{
    // Initialization
    create_flycam,

    // Movement
    move_forward,
    move_local,
    pitch,
    roll,
    set_zoom,
    yaw,

    // Queries
    build_query_matrix,
    forward_vector,
    request_log_zoom_step,
};
