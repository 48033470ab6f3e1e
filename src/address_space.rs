//! Per-context (stage-1) and per-stream (stage-2) page maps. §4.1.
//!
//! An [`AddressSpace`] is a sparse map from page number to [`PageEntry`]. It is deliberately
//! page-indexed rather than a simulated multi-level walk: per §1's non-goals, stage walkers
//! are modeled as maps, not table fetches.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{
    is_page_aligned, page_align, page_number, AccessType, PagePermissions, SecurityState,
};

/// A single page-level mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub physical_page_base: u64,
    pub permissions: PagePermissions,
    pub security: SecurityState,
}

/// The outcome of a page-level translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTranslation {
    pub physical_page_base: u64,
    pub permissions: PagePermissions,
    pub security: SecurityState,
}

/// A maximal contiguous run returned by [`AddressSpace::mapped_ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub start_iova: u64,
    pub end_iova: u64,
    pub start_pa: u64,
    pub permissions: PagePermissions,
    pub security: SecurityState,
}

/// A sparse, page-indexed map used as a stage-1 (per-context) or stage-2 (per-stream) space.
///
/// Uses a [`BTreeMap`] rather than a hash map so [`AddressSpace::mapped_ranges`] can walk
/// entries in address order without a separate sort.
#[derive(Debug, Default, Clone)]
pub struct AddressSpace {
    pages: BTreeMap<u64, PageEntry>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Maps `iova` to `pa` with `perms`. Overwrites any existing mapping at `iova`; the
    /// caller is responsible for invalidating any cache that may hold the stale entry.
    pub fn map_page(
        &mut self,
        iova: u64,
        pa: u64,
        perms: PagePermissions,
        security: SecurityState,
    ) -> Result<()> {
        if !is_page_aligned(iova) || !is_page_aligned(pa) {
            return Err(Error::InvalidAddress(iova));
        }
        self.pages.insert(
            page_number(iova),
            PageEntry {
                physical_page_base: pa,
                permissions: perms,
                security,
            },
        );
        Ok(())
    }

    /// Removes the mapping at `iova`. Errors with [`Error::PageNotMapped`] if absent.
    pub fn unmap_page(&mut self, iova: u64) -> Result<()> {
        self.pages
            .remove(&page_number(iova))
            .map(|_| ())
            .ok_or(Error::PageNotMapped(iova))
    }

    /// Maps `[start_iova, end_iova]` inclusive to physical pages starting at `start_pa`,
    /// page by page. On any page-level failure, unmaps everything this call mapped so the
    /// address space is left exactly as it was found (transactional range insertion).
    pub fn map_range(
        &mut self,
        start_iova: u64,
        end_iova: u64,
        start_pa: u64,
        perms: PagePermissions,
        security: SecurityState,
    ) -> Result<()> {
        if !is_page_aligned(start_iova) || !is_page_aligned(start_pa) {
            return Err(Error::InvalidAddress(start_iova));
        }
        let mut mapped = Vec::new();
        let mut iova = start_iova;
        let mut pa = start_pa;
        let result = loop {
            if iova > end_iova {
                break Ok(());
            }
            match self.map_page(iova, pa, perms, security) {
                Ok(()) => mapped.push(iova),
                Err(e) => break Err(e),
            }
            let (next_iova, iova_overflow) = iova.overflowing_add(crate::types::PAGE_SIZE);
            let (next_pa, pa_overflow) = pa.overflowing_add(crate::types::PAGE_SIZE);
            if iova_overflow || pa_overflow {
                break Ok(());
            }
            iova = next_iova;
            pa = next_pa;
        };
        if let Err(e) = result {
            for mapped_iova in mapped {
                // Best-effort rollback; the page was mapped by this call so it is present.
                let _ = self.unmap_page(mapped_iova);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes every present page in `[start_iova, end_iova]` inclusive. Absent pages are
    /// silently skipped.
    pub fn unmap_range(&mut self, start_iova: u64, end_iova: u64) {
        let start = page_number(page_align(start_iova));
        let end = page_number(page_align(end_iova));
        let keys: Vec<u64> = self.pages.range(start..=end).map(|(k, _)| *k).collect();
        for key in keys {
            self.pages.remove(&key);
        }
    }

    /// Translates a single page-aligned-or-not `iova` for `access` under `security`.
    pub fn translate_page(
        &self,
        iova: u64,
        access: AccessType,
        security: SecurityState,
    ) -> Result<PageTranslation> {
        let entry = self
            .pages
            .get(&page_number(iova))
            .ok_or(Error::PageNotMapped(iova))?;
        if !entry.permissions.allows(access) {
            return Err(Error::PagePermissionViolation(iova));
        }
        if security == SecurityState::NonSecure && entry.security == SecurityState::Secure {
            return Err(Error::InvalidSecurityState {
                requested: security,
                page: entry.security,
            });
        }
        Ok(PageTranslation {
            physical_page_base: entry.physical_page_base,
            permissions: entry.permissions,
            security: entry.security,
        })
    }

    /// Raw page lookup with no permission or security enforcement. Used by the translator
    /// when chaining stage-1 into stage-2, where the intersection and the security check
    /// happen once at the end of the walk rather than inside each stage.
    pub fn lookup_page(&self, iova: u64) -> Result<PageEntry> {
        self.pages
            .get(&page_number(iova))
            .copied()
            .ok_or(Error::PageNotMapped(iova))
    }

    pub fn is_page_mapped(&self, iova: u64) -> bool {
        self.pages.contains_key(&page_number(iova))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_permissions(&self, iova: u64) -> Option<PagePermissions> {
        self.pages.get(&page_number(iova)).map(|e| e.permissions)
    }

    /// The span in bytes from the lowest to the highest mapped page, inclusive of the last
    /// page. `None` if the space is empty.
    pub fn address_space_size(&self) -> Option<u64> {
        let lowest = *self.pages.keys().next()?;
        let highest = *self.pages.keys().next_back()?;
        Some((highest - lowest + 1) * crate::types::PAGE_SIZE)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Maximal contiguous runs where IOVA, PA, permissions, and security all line up
    /// page-to-page.
    pub fn mapped_ranges(&self) -> Vec<MappedRange> {
        let mut ranges = Vec::new();
        let mut iter = self.pages.iter().peekable();
        while let Some((&start_page, entry)) = iter.next() {
            let mut end_page = start_page;
            let mut expected_pa = entry.physical_page_base + crate::types::PAGE_SIZE;
            while let Some(&(&next_page, next_entry)) = iter.peek() {
                if next_page == end_page + 1
                    && next_entry.physical_page_base == expected_pa
                    && next_entry.permissions == entry.permissions
                    && next_entry.security == entry.security
                {
                    iter.next();
                    end_page = next_page;
                    expected_pa += crate::types::PAGE_SIZE;
                } else {
                    break;
                }
            }
            ranges.push(MappedRange {
                start_iova: start_page * crate::types::PAGE_SIZE,
                end_iova: end_page * crate::types::PAGE_SIZE + (crate::types::PAGE_SIZE - 1),
                start_pa: entry.physical_page_base,
                permissions: entry.permissions,
                security: entry.security,
            });
        }
        ranges
    }
}
