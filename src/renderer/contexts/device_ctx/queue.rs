use std::hash::Hash;
use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
    ) -> Self {
        Self {
            index,
            properties,
        }
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    /// A compute family without graphics support
    pub fn is_dedicated_compute(&self) -> bool {
        self.supports_compute()
            && !self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
