//! [`XrRuntime`] over the `openxr` crate with a Vulkan graphics binding.

use ash::vk::{self, Handle};
use dreamxr_vr::{ControllerPair, Eye, Fov, Pose, VrError, VrResult};
use openxr as xr;
use tracing::{debug, info, warn};

use crate::actions::{to_pose, ControllerActions};
use crate::runtime::{
    EyeView, FrameTiming, GraphicsBinding, HostContext, RuntimeEvent, SwapchainSet, ViewConfig,
    XrRuntime,
};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8A8_UNORM,
];

/// First preferred format the runtime offers, else whatever it lists first.
pub fn choose_swapchain_format(available: &[u32]) -> Option<vk::Format> {
    PREFERRED_FORMATS
        .iter()
        .copied()
        .find(|fmt| available.contains(&(fmt.as_raw() as u32)))
        .or_else(|| available.first().map(|&raw| vk::Format::from_raw(raw as i32)))
}

fn xr_err(what: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |e| VrError::Runtime(format!("OpenXR {what}: {e:?}"))
}

fn init_err(what: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |e| VrError::Init(format!("OpenXR {what}: {e:?}"))
}

fn to_posef(pose: &Pose) -> xr::Posef {
    let [x, y, z, w] = pose.orientation;
    let [px, py, pz] = pose.position;
    xr::Posef {
        orientation: xr::Quaternionf { x, y, z, w },
        position: xr::Vector3f {
            x: px,
            y: py,
            z: pz,
        },
    }
}

fn to_fovf(fov: &Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

struct SessionHandles {
    session: xr::Session<xr::Vulkan>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::Vulkan>,
}

pub struct OpenXrRuntime {
    application_name: String,
    entry: Option<xr::Entry>,
    instance: Option<xr::Instance>,
    session: Option<SessionHandles>,
    swapchains: Option<[xr::Swapchain<xr::Vulkan>; 2]>,
    swapchain_extent: vk::Extent2D,
    actions: Option<ControllerActions>,
    space: Option<xr::Space>,
    event_buffer: xr::EventDataBuffer,
}

impl OpenXrRuntime {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            entry: None,
            instance: None,
            session: None,
            swapchains: None,
            swapchain_extent: vk::Extent2D::default(),
            actions: None,
            space: None,
            event_buffer: xr::EventDataBuffer::new(),
        }
    }

    fn instance(&self) -> VrResult<&xr::Instance> {
        self.instance
            .as_ref()
            .ok_or_else(|| VrError::Protocol("OpenXR instance not created".to_string()))
    }

    fn handles(&mut self) -> VrResult<&mut SessionHandles> {
        self.session
            .as_mut()
            .ok_or_else(|| VrError::Protocol("OpenXR session not created".to_string()))
    }

    fn swapchain(&mut self, eye: Eye) -> VrResult<&mut xr::Swapchain<xr::Vulkan>> {
        self.swapchains
            .as_mut()
            .map(|s| &mut s[eye.index()])
            .ok_or_else(|| VrError::Protocol("OpenXR swapchains not created".to_string()))
    }
}

impl XrRuntime for OpenXrRuntime {
    fn create_instance(&mut self, host: &HostContext) -> VrResult<()> {
        #[cfg(target_os = "android")]
        crate::android::install_context(host)?;
        #[cfg(not(target_os = "android"))]
        let _ = host;

        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| VrError::Init(format!("OpenXR load failed: {e:?}")))?;

        #[cfg(target_os = "android")]
        entry
            .initialize_android_loader()
            .map_err(init_err("android loader init"))?;

        let available = entry
            .enumerate_extensions()
            .map_err(init_err("extension enumerate"))?;
        if !available.khr_vulkan_enable {
            return Err(VrError::Init(
                "OpenXR KHR_vulkan_enable not available".to_string(),
            ));
        }
        let mut exts = xr::ExtensionSet::default();
        exts.khr_vulkan_enable = true;
        #[cfg(target_os = "android")]
        {
            exts.khr_android_create_instance = true;
        }

        let app_info = xr::ApplicationInfo {
            application_name: &self.application_name,
            application_version: 1,
            engine_name: "DreamXR",
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = entry
            .create_instance(&app_info, &exts, &[])
            .map_err(init_err("create_instance"))?;

        if let Ok(props) = instance.properties() {
            let version = props.runtime_version;
            info!(
                "OpenXR instance created on {} {}.{}.{}",
                props.runtime_name,
                version.major(),
                version.minor(),
                version.patch()
            );
        }
        self.entry = Some(entry);
        self.instance = Some(instance);
        Ok(())
    }

    fn create_session(&mut self, binding: &GraphicsBinding) -> VrResult<ViewConfig> {
        let instance = self.instance()?;
        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(init_err("system"))?;

        let reqs = instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(init_err("Vulkan requirements"))?;
        let min = reqs.min_api_version_supported;
        debug!(
            "OpenXR requires Vulkan {}.{}.{} or newer",
            min.major(),
            min.minor(),
            min.patch()
        );

        let expected = unsafe {
            instance.vulkan_graphics_device(system, binding.instance.as_raw() as *const _)
        }
        .map_err(init_err("Vulkan graphics device"))?;
        if expected as u64 != binding.physical_device.as_raw() {
            warn!("host physical device differs from the one the runtime requested");
        }

        let views = instance
            .enumerate_view_configuration_views(system, VIEW_TYPE)
            .map_err(init_err("view configuration"))?;
        let view = match views.as_slice() {
            [left, _right, ..] => *left,
            _ => {
                return Err(VrError::Init(format!(
                    "stereo view configuration reports {} views",
                    views.len()
                )))
            }
        };

        let create_info = xr::vulkan::SessionCreateInfo {
            instance: binding.instance.as_raw() as *const _,
            physical_device: binding.physical_device.as_raw() as *const _,
            device: binding.device.as_raw() as *const _,
            queue_family_index: binding.queue_family_index,
            queue_index: binding.queue_index,
        };
        let (session, waiter, stream) = unsafe {
            instance
                .create_session::<xr::Vulkan>(system, &create_info)
                .map_err(init_err("create_session"))?
        };
        self.session = Some(SessionHandles {
            session,
            waiter,
            stream,
        });

        Ok(ViewConfig {
            recommended_width: view.recommended_image_rect_width,
            recommended_height: view.recommended_image_rect_height,
            max_width: view.max_image_rect_width,
            max_height: view.max_image_rect_height,
        })
    }

    fn create_swapchains(&mut self, extent: vk::Extent2D) -> VrResult<SwapchainSet> {
        let session = &self.handles()?.session;
        let formats = session
            .enumerate_swapchain_formats()
            .map_err(init_err("swapchain formats"))?;
        let format = choose_swapchain_format(&formats)
            .ok_or_else(|| VrError::Init("runtime offers no swapchain formats".to_string()))?;
        info!(?format, available = formats.len(), "swapchain format selected");

        let create_info = xr::SwapchainCreateInfo {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT,
            format: format.as_raw() as u32,
            sample_count: 1,
            width: extent.width,
            height: extent.height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        };
        let left = session
            .create_swapchain(&create_info)
            .map_err(init_err("swapchain"))?;
        let right = session
            .create_swapchain(&create_info)
            .map_err(init_err("swapchain"))?;
        let images = [
            left.enumerate_images()
                .map_err(init_err("swapchain images"))?
                .into_iter()
                .map(vk::Image::from_raw)
                .collect(),
            right
                .enumerate_images()
                .map_err(init_err("swapchain images"))?
                .into_iter()
                .map(vk::Image::from_raw)
                .collect(),
        ];

        self.swapchains = Some([left, right]);
        self.swapchain_extent = extent;
        Ok(SwapchainSet {
            format,
            extent,
            images,
        })
    }

    fn create_actions(&mut self) -> VrResult<()> {
        let instance = self.instance()?;
        let session = &self
            .session
            .as_ref()
            .ok_or_else(|| VrError::Protocol("OpenXR session not created".to_string()))?
            .session;
        let actions = ControllerActions::new(instance, session)?;
        self.actions = Some(actions);
        Ok(())
    }

    fn create_reference_space(&mut self) -> VrResult<()> {
        let space = self
            .handles()?
            .session
            .create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
            .map_err(init_err("reference space"))?;
        self.space = Some(space);
        Ok(())
    }

    fn poll_events(&mut self) -> VrResult<Vec<RuntimeEvent>> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| VrError::Protocol("OpenXR instance not created".to_string()))?;
        let mut events = Vec::new();
        while let Some(event) = instance
            .poll_event(&mut self.event_buffer)
            .map_err(xr_err("poll_event"))?
        {
            match event {
                xr::Event::SessionStateChanged(e) => {
                    debug!(state = ?e.state(), "OpenXR session state changed");
                    match e.state() {
                        xr::SessionState::READY => events.push(RuntimeEvent::Ready),
                        xr::SessionState::STOPPING => events.push(RuntimeEvent::Stopping),
                        xr::SessionState::EXITING => events.push(RuntimeEvent::Exiting),
                        xr::SessionState::LOSS_PENDING => events.push(RuntimeEvent::LossPending),
                        xr::SessionState::FOCUSED => events.push(RuntimeEvent::FocusChanged(true)),
                        xr::SessionState::VISIBLE => {
                            events.push(RuntimeEvent::FocusChanged(false))
                        }
                        _ => {}
                    }
                }
                xr::Event::InstanceLossPending(_) => events.push(RuntimeEvent::LossPending),
                _ => {}
            }
        }
        Ok(events)
    }

    fn begin_session(&mut self) -> VrResult<()> {
        self.handles()?
            .session
            .begin(VIEW_TYPE)
            .map_err(xr_err("session begin"))?;
        Ok(())
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.handles()?
            .session
            .end()
            .map_err(xr_err("session end"))?;
        Ok(())
    }

    fn wait_frame(&mut self) -> VrResult<FrameTiming> {
        let state = self.handles()?.waiter.wait().map_err(xr_err("wait"))?;
        Ok(FrameTiming {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, _timing: &FrameTiming) -> VrResult<()> {
        self.handles()?.stream.begin().map_err(xr_err("begin"))?;
        Ok(())
    }

    fn locate_views(&mut self, timing: &FrameTiming) -> VrResult<[EyeView; 2]> {
        let space = self
            .space
            .as_ref()
            .ok_or_else(|| VrError::Protocol("reference space not created".to_string()))?;
        let session = &self
            .session
            .as_ref()
            .ok_or_else(|| VrError::Protocol("OpenXR session not created".to_string()))?
            .session;
        let (_flags, views) = session
            .locate_views(
                VIEW_TYPE,
                xr::Time::from_nanos(timing.predicted_display_time),
                space,
            )
            .map_err(xr_err("locate_views"))?;
        let eye_view = |view: &xr::View| EyeView {
            pose: to_pose(view.pose),
            fov: Fov {
                angle_left: view.fov.angle_left,
                angle_right: view.fov.angle_right,
                angle_up: view.fov.angle_up,
                angle_down: view.fov.angle_down,
            },
        };
        match views.as_slice() {
            [left, right, ..] => Ok([eye_view(left), eye_view(right)]),
            _ => Err(VrError::Runtime(format!(
                "locate_views returned {} views",
                views.len()
            ))),
        }
    }

    fn acquire_image(&mut self, eye: Eye) -> VrResult<u32> {
        let swapchain = self.swapchain(eye)?;
        let index = swapchain.acquire_image().map_err(xr_err("acquire"))?;
        swapchain
            .wait_image(xr::Duration::INFINITE)
            .map_err(xr_err("wait_image"))?;
        Ok(index)
    }

    fn release_image(&mut self, eye: Eye) -> VrResult<()> {
        self.swapchain(eye)?
            .release_image()
            .map_err(xr_err("release"))?;
        Ok(())
    }

    fn end_frame(&mut self, timing: FrameTiming, views: Option<&[EyeView; 2]>) -> VrResult<()> {
        let time = xr::Time::from_nanos(timing.predicted_display_time);
        let extent = self.swapchain_extent;
        let handles = self
            .session
            .as_mut()
            .ok_or_else(|| VrError::Protocol("OpenXR session not created".to_string()))?;

        match (views, self.swapchains.as_ref(), self.space.as_ref()) {
            (Some(views), Some(swapchains), Some(space)) => {
                let rect = xr::Rect2Di {
                    offset: xr::Offset2Di { x: 0, y: 0 },
                    extent: xr::Extent2Di {
                        width: extent.width as i32,
                        height: extent.height as i32,
                    },
                };
                let layer_views = [
                    xr::CompositionLayerProjectionView::new()
                        .pose(to_posef(&views[0].pose))
                        .fov(to_fovf(&views[0].fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(&swapchains[0])
                                .image_array_index(0)
                                .image_rect(rect),
                        ),
                    xr::CompositionLayerProjectionView::new()
                        .pose(to_posef(&views[1].pose))
                        .fov(to_fovf(&views[1].fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(&swapchains[1])
                                .image_array_index(0)
                                .image_rect(rect),
                        ),
                ];
                let layer = xr::CompositionLayerProjection::new()
                    .space(space)
                    .views(&layer_views);
                let layers: [&xr::CompositionLayerBase<xr::Vulkan>; 1] = [&layer];
                handles
                    .stream
                    .end(time, xr::EnvironmentBlendMode::OPAQUE, &layers)
                    .map_err(xr_err("end"))?;
            }
            _ => {
                handles
                    .stream
                    .end(time, xr::EnvironmentBlendMode::OPAQUE, &[])
                    .map_err(xr_err("end"))?;
            }
        }
        Ok(())
    }

    fn sync_controllers(&mut self, display_time: i64) -> VrResult<ControllerPair> {
        let actions = self
            .actions
            .as_ref()
            .ok_or_else(|| VrError::Protocol("controller actions not created".to_string()))?;
        let session = &self
            .session
            .as_ref()
            .ok_or_else(|| VrError::Protocol("OpenXR session not created".to_string()))?
            .session;
        actions.poll(
            session,
            self.space.as_ref(),
            xr::Time::from_nanos(display_time),
        )
    }

    fn destroy_space(&mut self) {
        self.space = None;
    }

    fn destroy_actions(&mut self) {
        self.actions = None;
    }

    fn destroy_swapchains(&mut self) {
        self.swapchains = None;
    }

    fn destroy_session(&mut self) {
        self.session = None;
    }

    fn destroy_instance(&mut self) {
        self.instance = None;
        self.entry = None;
        #[cfg(target_os = "android")]
        crate::android::release_context();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(format: vk::Format) -> u32 {
        format.as_raw() as u32
    }

    #[test]
    fn test_prefers_srgb() {
        let offered = [
            raw(vk::Format::B8G8R8A8_UNORM),
            raw(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(
            choose_swapchain_format(&offered),
            Some(vk::Format::R8G8B8A8_SRGB)
        );
    }

    #[test]
    fn test_falls_back_to_first_offered() {
        let offered = [raw(vk::Format::R16G16B16A16_SFLOAT), raw(vk::Format::R8_UNORM)];
        assert_eq!(
            choose_swapchain_format(&offered),
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
        assert_eq!(choose_swapchain_format(&[]), None);
    }
}
