//! Device Context
//!
//! Owns the Vulkan instance, physical/logical device, queues, surface and
//! swapchain. Everything else in the engine borrows from here through an
//! `Arc<DeviceContext>`; the context is dropped last.

use std::ffi::CStr;
use std::sync::Arc;

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use parking_lot::{Mutex, RwLock};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::errors::{KilnError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices resolved during device selection.
///
/// `transfer` and `compute` are dedicated families (no graphics bit); when
/// absent, callers fall back to the graphics queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

/// Mutable swapchain state, replaced wholesale on resize.
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

/// Owner of the Vulkan instance, device, queues and swapchain.
pub struct DeviceContext {
    entry: Entry,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: Device,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: Option<vk::Queue>,
    compute_queue: Option<vk::Queue>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: swapchain::Device,
    swapchain: RwLock<SwapchainState>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    // Queue submission requires external synchronization; one lock covers
    // every queue so aliased handles (graphics == present) stay safe.
    submission_lock: Mutex<()>,
}

impl DeviceContext {
    /// Creates the full device stack against a host-provided window.
    ///
    /// The host keeps ownership of the window; the engine only consumes the
    /// raw handles and the initial extent.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        initial_extent: vk::Extent2D,
    ) -> Result<Arc<Self>> {
        let entry = unsafe { Entry::load() }.map_err(|err| {
            log::error!("Failed to load the Vulkan library: {err}");
            KilnError::Device(vk::Result::ERROR_INITIALIZATION_FAILED)
        })?;
        let instance = Self::create_instance(&entry, display)?;

        let surface = unsafe { ash_window::create_surface(&entry, &instance, display, window, None)? };
        let surface_loader = surface::Instance::new(&entry, &instance);

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let device = Self::create_device(&instance, physical_device, &queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let transfer_queue = queue_families
            .transfer
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        let compute_queue = queue_families
            .compute
            .map(|family| unsafe { device.get_device_queue(family, 0) });

        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let swapchain = Self::create_swapchain(
            &device,
            physical_device,
            &surface_loader,
            surface,
            &swapchain_loader,
            &queue_families,
            initial_extent,
            vk::SwapchainKHR::null(),
        )?;

        let debug_utils = if Self::has_instance_extension(&entry, ash::ext::debug_utils::NAME) {
            Some(ash::ext::debug_utils::Device::new(&instance, &device))
        } else {
            None
        };

        log::info!(
            "Device context ready: {:?}, swapchain {}x{} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) },
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format.format,
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            physical_device,
            properties,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            transfer_queue,
            compute_queue,
            surface_loader,
            surface,
            swapchain_loader,
            swapchain: RwLock::new(swapchain),
            debug_utils,
            submission_lock: Mutex::new(()),
        }))
    }

    fn create_instance(entry: &Entry, display: RawDisplayHandle) -> Result<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"kiln")
            .engine_name(c"kiln")
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const std::ffi::c_char> =
            ash_window::enumerate_required_extensions(display)?.to_vec();
        if Self::has_instance_extension(entry, ash::ext::debug_utils::NAME) {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut layers = Vec::new();
        if cfg!(debug_assertions) && Self::has_layer(entry, VALIDATION_LAYER) {
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        Ok(unsafe { entry.create_instance(&create_info, None)? })
    }

    fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
        unsafe { entry.enumerate_instance_extension_properties(None) }
            .map(|props| {
                props.iter().any(|p| {
                    p.extension_name_as_c_str()
                        .is_ok_and(|ext| ext == name)
                })
            })
            .unwrap_or(false)
    }

    fn has_layer(entry: &Entry, name: &CStr) -> bool {
        unsafe { entry.enumerate_instance_layer_properties() }
            .map(|props| {
                props.iter().any(|p| {
                    p.layer_name_as_c_str().is_ok_and(|layer| layer == name)
                })
            })
            .unwrap_or(false)
    }

    /// Picks the best physical device that can present to the surface.
    ///
    /// Discrete GPUs win over integrated; a device is only eligible if it
    /// exposes a graphics family, a present-capable family, and the
    /// swapchain extension.
    fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices()? };

        let mut best: Option<(vk::PhysicalDevice, QueueFamilies, u32)> = None;
        for device in devices {
            let Some(families) = Self::find_queue_families(instance, surface_loader, surface, device)?
            else {
                continue;
            };
            if !Self::has_device_extension(instance, device, swapchain::NAME) {
                continue;
            }

            let props = unsafe { instance.get_physical_device_properties(device) };
            let mut score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 100,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 50,
                _ => 10,
            };
            if families.transfer.is_some() {
                score += 5;
            }
            if best.as_ref().map_or(true, |(_, _, s)| score > *s) {
                best = Some((device, families, score));
            }
        }

        best.map(|(device, families, _)| (device, families))
            .ok_or_else(|| KilnError::Device(vk::Result::ERROR_INITIALIZATION_FAILED))
    }

    fn has_device_extension(
        instance: &Instance,
        device: vk::PhysicalDevice,
        name: &CStr,
    ) -> bool {
        unsafe { instance.enumerate_device_extension_properties(device) }
            .map(|props| {
                props.iter().any(|p| {
                    p.extension_name_as_c_str().is_ok_and(|ext| ext == name)
                })
            })
            .unwrap_or(false)
    }

    fn find_queue_families(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;
        let mut transfer = None;
        let mut compute = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let flags = family.queue_flags;

            if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            // Dedicated families only; graphics-capable queues already cover
            // the general case.
            if transfer.is_none()
                && flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                transfer = Some(index);
            }
            if compute.is_none()
                && flags.contains(vk::QueueFlags::COMPUTE)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                compute = Some(index);
            }
            if present.is_none() {
                let supported = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)?
                };
                if supported {
                    present = Some(index);
                }
            }
        }

        Ok(match (graphics, present) {
            (Some(graphics), Some(present)) => Some(QueueFamilies {
                graphics,
                present,
                transfer,
                compute,
            }),
            _ => None,
        })
    }

    fn create_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<Device> {
        let mut unique_families = vec![families.graphics];
        for family in [Some(families.present), families.transfer, families.compute]
            .into_iter()
            .flatten()
        {
            if !unique_families.contains(&family) {
                unique_families.push(family);
            }
        }

        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = [swapchain::NAME.as_ptr()];

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
        let mut vk13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(features)
            .push_next(&mut vk13);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features2);

        Ok(unsafe { instance.create_device(physical_device, &create_info, None)? })
    }

    #[allow(clippy::too_many_arguments)]
    fn create_swapchain(
        device: &Device,
        physical_device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        swapchain_loader: &swapchain::Device,
        families: &QueueFamilies,
        requested_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainState> {
        let caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };

        let format = formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(formats[0]);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: requested_extent.width.clamp(
                    caps.min_image_extent.width,
                    caps.max_image_extent.width,
                ),
                height: requested_extent.height.clamp(
                    caps.min_image_extent.height,
                    caps.max_image_extent.height,
                ),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old_swapchain);

        if families.graphics == families.present {
            create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices);
        }

        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(handle)? };

        let views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.create_image_view(&view_info, None) }
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SwapchainState {
            handle,
            format,
            extent,
            images,
            views,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Dedicated transfer queue, when the hardware exposes one.
    pub fn transfer_queue(&self) -> Option<vk::Queue> {
        self.transfer_queue
    }

    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.read().format.format
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.read().extent
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.read().images.len()
    }

    pub fn swapchain_image(&self, index: usize) -> vk::Image {
        self.swapchain.read().images[index]
    }

    pub fn swapchain_view(&self, index: usize) -> vk::ImageView {
        self.swapchain.read().views[index]
    }

    /// True when `format` supports linear-filtered blits with optimal tiling,
    /// the precondition for mipmap generation.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    // ========================================================================
    // Submission & Presentation
    // ========================================================================

    /// Submits to `queue` under the shared submission lock.
    pub fn submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.submission_lock.lock();
        unsafe { self.device.queue_submit(queue, submits, fence)? };
        Ok(())
    }

    /// Acquires the next swapchain image. Returns the image index and the
    /// suboptimal flag; `ERROR_OUT_OF_DATE_KHR` propagates for the caller to
    /// trigger recreation.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        let swapchain = self.swapchain.read();
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )?
        };
        Ok(result)
    }

    /// Presents `image_index` after `wait_semaphore` signals. Returns the
    /// suboptimal flag.
    pub fn present(&self, wait_semaphore: vk::Semaphore, image_index: u32) -> Result<bool> {
        let swapchain = self.swapchain.read();
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain.handle];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let _guard = self.submission_lock.lock();
        let suboptimal =
            unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info)? };
        Ok(suboptimal)
    }

    /// Recreates the swapchain at a new extent. The caller must ensure no
    /// frame is in flight; `wait_idle` is invoked here as a backstop.
    pub fn recreate_swapchain(&self, extent: vk::Extent2D) -> Result<()> {
        self.wait_idle()?;

        let mut swapchain = self.swapchain.write();
        unsafe {
            for &view in &swapchain.views {
                self.device.destroy_image_view(view, None);
            }
        }
        let old_handle = swapchain.handle;

        *swapchain = Self::create_swapchain(
            &self.device,
            self.physical_device,
            &self.surface_loader,
            self.surface,
            &self.swapchain_loader,
            &self.queue_families,
            extent,
            old_handle,
        )?;

        unsafe { self.swapchain_loader.destroy_swapchain(old_handle, None) };
        log::debug!(
            "Swapchain recreated at {}x{}",
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Attaches a diagnostic name to a Vulkan object when debug utils are
    /// available; a no-op otherwise.
    pub fn set_debug_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::warn!("Failed to set debug name: {err}");
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            let swapchain = self.swapchain.get_mut();
            for &view in &swapchain.views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(swapchain.handle, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        // `entry` unloads the library after everything above is gone.
        let _ = &self.entry;
    }
}
