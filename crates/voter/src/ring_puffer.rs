//! Generischer Ringpuffer fester Laenge
//!
//! Alle Zugriffe arbeiten auf Spannen `(start, anzahl)`, die ueber das Ende
//! hinauslaufen duerfen. Die Aufteilung in Kopf- und Umlaufteil passiert
//! ausschliesslich in [`RingPuffer::spanne`] und [`RingPuffer::spanne_mut`].

/// Zirkulaerer Puffer mit fester Laenge
#[derive(Debug, Clone)]
pub struct RingPuffer<T: Copy> {
    daten: Vec<T>,
}

impl<T: Copy> RingPuffer<T> {
    /// Erstellt einen Puffer der Laenge `laenge`, gefuellt mit `wert`
    ///
    /// # Panics
    /// Bei `laenge == 0`.
    pub fn neu(laenge: usize, wert: T) -> Self {
        assert!(laenge > 0, "Ringpuffer braucht mindestens ein Element");
        Self {
            daten: vec![wert; laenge],
        }
    }

    pub fn laenge(&self) -> usize {
        self.daten.len()
    }

    /// Liefert die Spanne als (Kopf, Umlauf). Der Umlauf ist leer, wenn die
    /// Spanne nicht ueber das Pufferende reicht.
    pub fn spanne(&self, start: usize, anzahl: usize) -> (&[T], &[T]) {
        let (start, kopf, umlauf) = self.aufteilen(start, anzahl);
        (&self.daten[start..start + kopf], &self.daten[..umlauf])
    }

    /// Veraenderliche Variante von [`spanne`](Self::spanne)
    pub fn spanne_mut(&mut self, start: usize, anzahl: usize) -> (&mut [T], &mut [T]) {
        let (start, kopf, umlauf) = self.aufteilen(start, anzahl);
        let (vorne, hinten) = self.daten.split_at_mut(start);
        (&mut hinten[..kopf], &mut vorne[..umlauf])
    }

    /// Schreibt `werte` ab Position `start`
    pub fn schreiben(&mut self, start: usize, werte: &[T]) {
        let (kopf, umlauf) = self.spanne_mut(start, werte.len());
        let n = kopf.len();
        kopf.copy_from_slice(&werte[..n]);
        umlauf.copy_from_slice(&werte[n..]);
    }

    /// Liest `ziel.len()` Werte ab Position `start`
    pub fn lesen(&self, start: usize, ziel: &mut [T]) {
        let (kopf, umlauf) = self.spanne(start, ziel.len());
        ziel[..kopf.len()].copy_from_slice(kopf);
        ziel[kopf.len()..].copy_from_slice(umlauf);
    }

    /// Setzt `anzahl` Werte ab `start` auf `wert`
    pub fn fuellen(&mut self, start: usize, anzahl: usize, wert: T) {
        let (kopf, umlauf) = self.spanne_mut(start, anzahl);
        kopf.fill(wert);
        umlauf.fill(wert);
    }

    /// Setzt den gesamten Puffer auf `wert`
    pub fn alles_fuellen(&mut self, wert: T) {
        self.daten.fill(wert);
    }

    fn aufteilen(&self, start: usize, anzahl: usize) -> (usize, usize, usize) {
        let laenge = self.daten.len();
        assert!(
            anzahl <= laenge,
            "Spanne ({anzahl}) groesser als Puffer ({laenge})"
        );
        let start = start % laenge;
        let kopf = anzahl.min(laenge - start);
        (start, kopf, anzahl - kopf)
    }
}

impl RingPuffer<u8> {
    /// Summe ueber eine Spanne
    pub fn summe(&self, start: usize, anzahl: usize) -> u32 {
        let (kopf, umlauf) = self.spanne(start, anzahl);
        kopf.iter().chain(umlauf).map(|&w| w as u32).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schreiben_und_lesen_ohne_umlauf() {
        let mut puffer = RingPuffer::neu(16, 0u8);
        puffer.schreiben(4, &[1, 2, 3]);
        let mut ziel = [0u8; 3];
        puffer.lesen(4, &mut ziel);
        assert_eq!(ziel, [1, 2, 3]);
        assert_eq!(puffer.spanne(4, 3).1.len(), 0);
    }

    #[test]
    fn schreiben_ueber_das_ende() {
        let mut puffer = RingPuffer::neu(8, 0u8);
        puffer.schreiben(6, &[1, 2, 3, 4]);

        let (kopf, umlauf) = puffer.spanne(6, 4);
        assert_eq!(kopf, &[1, 2]);
        assert_eq!(umlauf, &[3, 4]);

        let mut ziel = [0u8; 4];
        puffer.lesen(6, &mut ziel);
        assert_eq!(ziel, [1, 2, 3, 4]);
        // Mitte bleibt unberuehrt
        assert_eq!(puffer.spanne(2, 4).0, &[0, 0, 0, 0]);
    }

    #[test]
    fn start_wird_modulo_genommen() {
        let mut puffer = RingPuffer::neu(10, 0u8);
        puffer.schreiben(23, &[9]);
        assert_eq!(puffer.spanne(3, 1).0, &[9]);
    }

    #[test]
    fn fuellen_mit_umlauf() {
        let mut puffer = RingPuffer::neu(6, 0xFFu8);
        puffer.fuellen(4, 4, 7);
        assert_eq!(puffer.spanne(0, 6).0, &[7, 7, 0xFF, 0xFF, 7, 7]);
    }

    #[test]
    fn summe_ueber_umlauf() {
        let mut puffer = RingPuffer::neu(5, 0u8);
        puffer.fuellen(0, 5, 200);
        assert_eq!(puffer.summe(3, 5), 1000);
        puffer.fuellen(3, 2, 0);
        assert_eq!(puffer.summe(3, 5), 600);
    }

    #[test]
    fn volle_spanne_ab_beliebigem_start() {
        let mut puffer = RingPuffer::neu(4, 0u16);
        puffer.schreiben(2, &[1, 2, 3, 4]);
        let mut ziel = [0u16; 4];
        puffer.lesen(0, &mut ziel);
        assert_eq!(ziel, [3, 4, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "groesser als Puffer")]
    fn zu_grosse_spanne_panikt() {
        let puffer = RingPuffer::neu(4, 0u8);
        let _ = puffer.spanne(0, 5);
    }
}
