pub mod candle_aux_layers;
pub mod candle_aux_linear;
pub mod candle_data_loader;
pub mod candle_decoder_mixture;
pub mod candle_elbo;
pub mod candle_encoder_natparam;
pub mod candle_gaussian;
pub mod candle_imputation;
pub mod candle_inference;
pub mod candle_linalg;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_recognition_gmm;
pub mod candle_student_t;
pub mod cli;
pub mod common_io;
pub mod config;
pub mod datasets;
pub mod error;
pub mod model;
pub mod summary;
pub mod tensor_util;
pub mod trainer;

pub use candle_core;
pub use candle_nn;
