/// Swapchain image set shared by the backends

/// Ordered swapchain images with one view per image
///
/// The extent is fixed at creation; a resize builds a new set.
#[derive(Debug, Clone)]
pub struct SwapchainImages<I, V> {
    images: Vec<I>,
    views: Vec<V>,
    width: u32,
    height: u32,
}

impl<I, V> SwapchainImages<I, V> {
    /// Pair every image with the view built by `make_view`
    pub fn new<E>(
        images: Vec<I>,
        (width, height): (u32, u32),
        mut make_view: impl FnMut(&I) -> Result<V, E>,
    ) -> Result<Self, E> {
        let views = images.iter().map(&mut make_view).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { images, views, width, height })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// # Panics
    ///
    /// If `index` is not an acquired image index.
    pub fn image(&self, index: u32) -> &I {
        &self.images[index as usize]
    }

    pub fn view(&self, index: u32) -> &V {
        &self.views[index as usize]
    }

    pub fn views(&self) -> &[V] {
        &self.views
    }

    /// Hand every view back for destruction; the images belong to the platform swapchain
    pub fn into_views(self) -> Vec<V> {
        self.views
    }
}
