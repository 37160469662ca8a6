use candle_core::{DType, Device, Tensor};
use log::{info, warn};

/// Picks the compute device for training and inference.
///
/// Probes Metal, then CUDA (each only when built with the matching cargo
/// feature), and falls back to the CPU. A backend that initializes but
/// cannot run a layer norm, which every BERT layer needs, is skipped.
/// `force_cpu` skips probing entirely.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        info!("Using CPU (accelerators disabled)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if candle_core::utils::metal_is_available() {
            match Device::new_metal(0) {
                Ok(device) if supports_layer_norm(&device) => {
                    info!("Using Metal GPU");
                    return device;
                }
                Ok(_) => warn!("Metal GPU lacks layer-norm support, skipping"),
                Err(e) => warn!("Metal GPU unavailable: {}", e),
            }
        }
    }
    #[cfg(feature = "cuda")]
    {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(device) if supports_layer_norm(&device) => {
                    info!("Using CUDA GPU");
                    return device;
                }
                Ok(_) => warn!("CUDA GPU lacks layer-norm support, skipping"),
                Err(e) => warn!("CUDA GPU unavailable: {}", e),
            }
        }
    }

    info!("Using CPU");
    Device::Cpu
}

fn supports_layer_norm(device: &Device) -> bool {
    let probe = || -> candle_core::Result<()> {
        let weight = Tensor::ones(4, DType::F32, device)?;
        let bias = Tensor::zeros(4, DType::F32, device)?;
        let xs = Tensor::new(&[[1f32, 2., 3., 4.]], device)?;
        candle_nn::ops::layer_norm(&xs, &weight, &bias, 1e-5)?;
        Ok(())
    };
    match probe() {
        Ok(()) => true,
        Err(e) => {
            warn!("Layer-norm probe failed on {:?}: {}", device, e);
            false
        }
    }
}
