use std::ffi::{c_char, CStr};
use std::ops::Deref;
use std::str::Utf8Error;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily};

/// Shared owner of the Vulkan device.
///
/// Pipeline backends hold a clone, so compute pipelines handed out by the
/// pipeline context may outlive the renderer. The device is destroyed when
/// the last clone is dropped, and keeps the instance alive until then.
pub struct LogicalDevice {
    raw: ash::Device,
    _instance: Arc<RenderInstance>,
}

impl Deref for LogicalDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.raw.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed: {}", err);
            }
            self.raw.destroy_device(None);
        }
    }
}

/// Logical device used to compile and run compute pipelines
pub struct RenderDevice {
    pub logical: Arc<LogicalDevice>,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,

    pub compute_queue: Queue,
}

impl RenderDevice {
    pub fn new(render_instance: &Arc<RenderInstance>) -> Result<Self> {
        let instance = &render_instance.instance;
        let (
            physical_device,
            compute_queue_family,
        ) = Self::select_physical_device(instance)?;

        let properties = unsafe {
            instance.get_physical_device_properties(physical_device)
        };
        log::info!(
            "Using physical device {:?} ({:?})",
            properties.device_name_as_c_str().unwrap_or(c"<unknown>"),
            properties.device_type,
        );

        let (
            logical_device,
            compute_queue,
        ) = Self::create_logical_device(
            instance,
            &physical_device,
            compute_queue_family,
        )?;

        Ok(Self {
            logical: Arc::new(LogicalDevice {
                raw: logical_device,
                _instance: Arc::clone(render_instance),
            }),
            physical: physical_device,
            properties,
            compute_queue,
        })
    }

    fn select_physical_device(
        instance: &ash::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamily)> {
        let req_device_exts = Self::get_required_device_extensions();
        let req_device_exts = req_device_exts
            .iter()
            .map(|ext| ext.to_str())
            .collect::<std::result::Result<Vec<&str>, Utf8Error>>()?;

        Ok(unsafe {
            instance
                .enumerate_physical_devices()?
                .into_iter()
                // Filter out devices that do not contain the required device extensions
                .filter(|device| {
                    let supported_extensions = instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default();

                    req_device_exts.iter().all(|req_ext| {
                        let req_ext_supported = supported_extensions
                            .iter()
                            .any(|sup_ext| {
                                sup_ext
                                    .extension_name_as_c_str()
                                    .ok()
                                    .and_then(|name| name.to_str().ok())
                                    == Some(*req_ext)
                            });
                        if !req_ext_supported {
                            log::error!("Device extension not supported: {}", req_ext);
                        }
                        req_ext_supported
                    })
                })
                // Filter out devices without a compute queue, preferring a dedicated one
                .filter_map(|device| {
                    let props = instance
                        .get_physical_device_queue_family_properties(device);

                    let dedicated = props
                        .iter()
                        .position(|q| {
                            q.queue_flags.contains(vk::QueueFlags::COMPUTE)
                                && !q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                        });
                    let any = props
                        .iter()
                        .position(|q| q.queue_flags.contains(vk::QueueFlags::COMPUTE));

                    dedicated
                        .or(any)
                        .map(|index| (device, QueueFamily::new(index as u32, props[index])))
                })
                .min_by_key(|(device, _)| {
                    let props = instance.get_physical_device_properties(*device);
                    match props.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                        vk::PhysicalDeviceType::CPU => 3,
                        vk::PhysicalDeviceType::OTHER => 4,
                        _ => 5,
                    }
                })
                .ok_or_eyre("No suitable physical device found")?
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        compute_queue_family: QueueFamily,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(compute_queue_family.index)
                .queue_priorities(&queue_priorities),
        ];

        // Create device
        let device = {
            let enabled_extension_names = Self::get_required_device_extensions()
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            // Unbound slots are left unwritten in descriptor sets
            let mut descriptor_indexing_features =
                vk::PhysicalDeviceDescriptorIndexingFeatures::default()
                    .descriptor_binding_partially_bound(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .push_next(&mut descriptor_indexing_features);

            unsafe {
                instance.create_device(*physical_device, &device_create_info, None)?
            }
        };

        let compute_queue = unsafe {
            let queue = device.get_device_queue(compute_queue_family.index, 0);
            Queue::new(compute_queue_family, queue)
        };

        Ok((device, compute_queue))
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::ext::descriptor_indexing::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}
